//! 🚚 The Flusher: one batch in, one object out (or one very loud error).
//!
//! Each flush:
//! 1. renders the object key once (fresh `%{uuid}`), so every retry overwrites the same blob
//! 2. inside the retry executor, per attempt: compress, make sure the container
//!    exists (if auto-create is on), put the object, all within 30 seconds
//! 3. counts what happened
//!
//! Flushes never report back to the control loop. Success is a counter, failure
//! is an `error!` line and a different counter. The loop has better things to do.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error};

use crate::app_config::SinkSettings;
use crate::backends::{ContentOptions, ObjectStore, StoreBackend};
use crate::common::Batch;
use crate::compression::Compression;
use crate::object_key::ObjectKeyTemplate;
use crate::retry::{self, RetryPolicy};
use crate::stats::SinkStats;

/// ⏱️ Ceiling on one compress + ensure + put attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// 🚚 Everything a flush task needs, shared read-only across all of them.
#[derive(Debug)]
pub(crate) struct Flusher {
    store: StoreBackend,
    key_template: ObjectKeyTemplate,
    hostname: String,
    compression: Compression,
    retry: RetryPolicy,
    auto_create: bool,
    attempt_timeout: Duration,
    stats: Arc<SinkStats>,
}

impl Flusher {
    pub(crate) fn new(settings: &SinkSettings, store: StoreBackend, stats: Arc<SinkStats>) -> Self {
        Self {
            store,
            key_template: settings.key_template.clone(),
            hostname: settings.hostname.clone(),
            compression: settings.compression,
            retry: settings.retry,
            auto_create: settings.auto_create_container,
            attempt_timeout: ATTEMPT_TIMEOUT,
            stats,
        }
    }

    /// 🚀 Ships one batch. Never returns an error: exhausted retries are logged and counted.
    pub(crate) async fn flush(&self, time_slice: String, batch: Batch) {
        let key = self.key_template.render(&self.hostname, &time_slice);
        // -- 🔢 one record per line, and lines are joined, not terminated
        let records = memchr::memchr_iter(b'\n', &batch.buffer).count() as u64 + 1;
        let options = ContentOptions {
            content_type: self.compression.content_type().to_string(),
        };
        let attempts = AtomicU64::new(0);

        debug!(
            "🚚 flushing slice={time_slice} records={records} bytes={} blob={key}",
            batch.len()
        );

        let outcome = retry::execute(&self.retry, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            let key = key.as_str();
            let buffer = batch.buffer.as_slice();
            let options = &options;
            async move {
                tokio::time::timeout(self.attempt_timeout, self.attempt(key, buffer, options))
                    .await
                    .map_err(|_| {
                        anyhow::anyhow!("💀 upload attempt gave up after {:?}", self.attempt_timeout)
                    })?
            }
        })
        .await;

        let retries = attempts.load(Ordering::Relaxed).saturating_sub(1);
        if retries > 0 {
            self.stats.retried(retries);
        }

        match outcome {
            Ok(uploaded) => {
                debug!("✅ uploaded blob={key} records={records} bytes={uploaded} retries={retries}");
                self.stats.batch_flushed(records, uploaded as u64);
            }
            Err(err) => {
                error!(
                    "💀 failed to flush buffer, dropping batch: blob={key} records={records} store={} error={err:#}",
                    self.store.describe()
                );
                self.stats.batch_dropped(records);
            }
        }
    }

    /// One try. Returns the number of bytes that went over the wire.
    async fn attempt(&self, key: &str, buffer: &[u8], options: &ContentOptions) -> Result<usize> {
        let body = self.compression.compress(buffer)?;
        let size = body.len();
        if self.auto_create {
            self.store
                .ensure_destination_exists()
                .await
                .context("💀 could not make sure the container exists")?;
        }
        self.store
            .put_object(key, body, options)
            .await
            .context(format!("💀 upload to blob error: blob={key}"))?;
        Ok(size)
    }

    #[cfg(test)]
    fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;

    fn flusher(store: &InMemoryStore, tweak: impl FnOnce(&mut SinkSettings)) -> (Flusher, Arc<SinkStats>) {
        let mut settings = SinkSettings::in_memory();
        settings.retry = RetryPolicy::new(Some(3)).with_base_interval(Duration::from_millis(10));
        tweak(&mut settings);
        let stats = Arc::new(SinkStats::default());
        let flusher = Flusher::new(&settings, StoreBackend::InMemory(store.clone()), stats.clone());
        (flusher, stats)
    }

    fn batch(lines: &[&str]) -> Batch {
        let mut iter = lines.iter();
        let mut batch = Batch::seeded(iter.next().map(|l| l.as_bytes().to_vec()).unwrap_or_default());
        for line in iter {
            batch.append(line.as_bytes());
        }
        batch
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_batch_lands_gzipped_under_its_slice() -> Result<()> {
        let store = InMemoryStore::new();
        let (flusher, stats) = flusher(&store, |_| {});

        flusher
            .flush("2024010100-00".into(), batch(&[r#"{"a":1}"#, r#"{"a":2}"#]))
            .await;

        let objects = store.objects().await;
        assert_eq!(objects.len(), 1);
        assert!(objects[0].key.starts_with("2024010100-00_"));
        assert!(objects[0].key.ends_with(".gz"));
        assert_eq!(objects[0].content_type, "application/gzip");
        assert_eq!(
            Compression::Gzip.decompress(&objects[0].body)?,
            b"{\"a\":1}\n{\"a\":2}".to_vec()
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batches_flushed, 1);
        assert_eq!(snapshot.records_flushed, 2);
        assert_eq!(snapshot.bytes_uploaded, objects[0].body.len() as u64);
        assert_eq!(snapshot.upload_retries, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_every_retry_reuses_the_same_key() {
        let store = InMemoryStore::new();
        store.fail_next_puts(2);
        let (flusher, stats) = flusher(&store, |_| {});

        flusher.flush("slice".into(), batch(&["x"])).await;

        let keys = store.attempted_keys().await;
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k == &keys[0]), "keys drifted: {keys:?}");
        assert_eq!(store.objects().await.len(), 1);
        assert_eq!(stats.snapshot().upload_retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_retries_run_out_and_the_batch_is_dropped() {
        let store = InMemoryStore::new();
        store.fail_next_puts(u64::MAX);
        let (flusher, stats) = flusher(&store, |_| {});

        flusher.flush("slice".into(), batch(&["x", "y", "z"])).await;

        assert_eq!(store.put_attempts(), 4);
        assert!(store.objects().await.is_empty());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batches_dropped, 1);
        assert_eq!(snapshot.records_dropped, 3);
        assert_eq!(snapshot.batches_flushed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_auto_create_checks_before_every_attempt() {
        let store = InMemoryStore::without_container();
        store.fail_next_puts(1);
        let (flusher, stats) = flusher(&store, |s| s.auto_create_container = true);

        flusher.flush("slice".into(), batch(&["x"])).await;

        assert_eq!(store.existence_checks(), 2);
        assert_eq!(store.containers_created(), 1);
        assert_eq!(store.objects().await.len(), 1);
        assert_eq!(stats.snapshot().batches_flushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_missing_container_without_auto_create_is_fatal_to_the_batch() {
        let store = InMemoryStore::without_container();
        let (flusher, stats) = flusher(&store, |_| {});

        flusher.flush("slice".into(), batch(&["x"])).await;

        assert_eq!(store.existence_checks(), 0);
        assert_eq!(stats.snapshot().batches_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_hung_store_times_out_and_counts_as_a_failure() {
        let store = InMemoryStore::new().with_put_delay(Duration::from_secs(60));
        let (flusher, stats) = flusher(&store, |s| s.retry = RetryPolicy::new(Some(0)));
        let flusher = flusher.with_attempt_timeout(Duration::from_secs(1));

        flusher.flush("slice".into(), batch(&["x"])).await;

        assert!(store.objects().await.is_empty());
        assert_eq!(stats.snapshot().batches_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_plain_text_keeps_its_txt_extension() -> Result<()> {
        let store = InMemoryStore::new();
        let (flusher, _) = flusher(&store, |s| {
            s.compression = Compression::Plain;
            s.key_template = ObjectKeyTemplate::new("%{hostname}/%{time_slice}.%{file_extension}", "", "txt");
        });

        flusher.flush("2024010100-00".into(), batch(&["plain"])).await;

        let objects = store.objects().await;
        assert_eq!(objects[0].key, "test-host/2024010100-00.txt");
        assert_eq!(objects[0].body, b"plain".to_vec());
        assert_eq!(objects[0].content_type, "text/plain; charset=utf-8");
        Ok(())
    }
}

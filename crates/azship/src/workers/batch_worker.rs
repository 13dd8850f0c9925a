// ai
//! 🎬 *[an intake channel hums. a ticker ticks. somewhere, a batch grows old.]*
//!
//! ⏱️ The BatchWorker: the single control loop that owns every live batch.
//!
//! 🧠 Knowledge graph:
//! - State: `HashMap<time_slice, Batch>`, touched by nobody else. No locks needed.
//! - Events, all inside one `select!`:
//!   - 📨 entry on the intake → append, maybe size-flush
//!   - ⏰ tick every `max(batch_wait / 10, 50ms)` → flush everything older than `batch_wait`
//!   - 🧹 a flush task finished → reap it
//!   - 🏁 intake closed and empty → drain: flush every batch, wait for every flush
//! - Flushes run as tasks in a `JoinSet` the loop owns. They never touch the map.
//!
//! ⚠️ Size rule is check-before-grow: a batch already over the limit gets shipped
//! when the NEXT entry arrives, and that entry seeds the new batch. So a batch can
//! be one entry bigger than the limit. That's the contract, not a bug.

use std::collections::HashMap;
use std::collections::hash_map::Entry as Slot;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_channel::Receiver;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, error, info, info_span, trace};

use super::{Flusher, Worker};
use crate::common::{Batch, Entry};

/// 🐢 The ticker never runs faster than this, however short `batch_wait` is.
const MIN_TICK: Duration = Duration::from_millis(50);

fn tick_period(batch_wait: Duration) -> Duration {
    (batch_wait / 10).max(MIN_TICK)
}

/// ⏱️ Receives entries, groups them by time slice, and decides when each group ships.
#[derive(Debug)]
pub(crate) struct BatchWorker {
    rx: Receiver<Entry>,
    flusher: Arc<Flusher>,
    batch_wait: Duration,
    size_limit: usize,
    instance: String,
}

impl BatchWorker {
    pub(crate) fn new(
        rx: Receiver<Entry>,
        flusher: Flusher,
        batch_wait: Duration,
        size_limit: usize,
        instance: String,
    ) -> Self {
        Self {
            rx,
            flusher: Arc::new(flusher),
            batch_wait,
            size_limit,
            instance,
        }
    }

    async fn run(self) -> Result<()> {
        let mut batches: HashMap<String, Batch> = HashMap::new();
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut ticker = tokio::time::interval(tick_period(self.batch_wait));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "🚀 batch worker up: wait={:?} limit={} bytes tick={:?}",
            self.batch_wait,
            self.size_limit,
            tick_period(self.batch_wait)
        );

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Ok(entry) => self.append(&mut batches, &mut in_flight, entry),
                    // -- 🏁 closed AND empty: async-channel hands out whatever was queued before saying so
                    Err(_) => break,
                },
                _ = ticker.tick() => self.flush_expired(&mut batches, &mut in_flight),
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => reap(joined),
            }
        }

        debug!(
            "🏁 intake closed. draining {} batches, {} flushes already in flight",
            batches.len(),
            in_flight.len()
        );
        for (time_slice, batch) in batches.drain() {
            self.dispatch(&mut in_flight, time_slice, batch);
        }
        while let Some(joined) = in_flight.join_next().await {
            reap(joined);
        }
        info!("🏁 batch worker drained. every batch has been flushed or reported.");
        Ok(())
    }

    fn append(&self, batches: &mut HashMap<String, Batch>, in_flight: &mut JoinSet<()>, entry: Entry) {
        let Entry {
            time_slice,
            payload,
        } = entry;
        match batches.entry(time_slice) {
            Slot::Vacant(slot) => {
                trace!("🆕 new batch for slice={}", slot.key());
                slot.insert(Batch::seeded(payload));
            }
            Slot::Occupied(mut slot) if slot.get().len() <= self.size_limit => {
                slot.get_mut().append(&payload);
            }
            Slot::Occupied(mut slot) => {
                let full = std::mem::replace(slot.get_mut(), Batch::seeded(payload));
                let time_slice = slot.key().clone();
                debug!(
                    "📦 slice={time_slice} reached {} bytes (limit {}), flushing early",
                    full.len(),
                    self.size_limit
                );
                self.dispatch(in_flight, time_slice, full);
            }
        }
    }

    fn flush_expired(&self, batches: &mut HashMap<String, Batch>, in_flight: &mut JoinSet<()>) {
        let now = Instant::now();
        let expired: Vec<String> = batches
            .iter()
            .filter(|(_, batch)| now.duration_since(batch.created_at) >= self.batch_wait)
            .map(|(time_slice, _)| time_slice.clone())
            .collect();
        for time_slice in expired {
            if let Some(batch) = batches.remove(&time_slice) {
                debug!("⏰ slice={time_slice} waited {:?}, flushing", self.batch_wait);
                self.dispatch(in_flight, time_slice, batch);
            }
        }
    }

    fn dispatch(&self, in_flight: &mut JoinSet<()>, time_slice: String, batch: Batch) {
        let flusher = Arc::clone(&self.flusher);
        in_flight.spawn(async move { flusher.flush(time_slice, batch).await }.in_current_span());
    }
}

fn reap(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!("💀 a flush task died before it could report: {err}");
    }
}

impl Worker for BatchWorker {
    fn start(self, runtime: &Handle) -> JoinHandle<Result<()>> {
        let span = info_span!("batch_worker", instance = %self.instance);
        runtime.spawn(self.run().instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::SinkSettings;
    use crate::backends::{InMemoryStore, StoreBackend};
    use crate::compression::Compression;
    use crate::retry::RetryPolicy;
    use crate::stats::SinkStats;

    struct Rig {
        tx: async_channel::Sender<Entry>,
        handle: JoinHandle<Result<()>>,
        store: InMemoryStore,
    }

    fn rig(store: InMemoryStore, size_limit: usize) -> Rig {
        let mut settings = SinkSettings::in_memory();
        settings.compression = Compression::Plain;
        settings.retry = RetryPolicy::new(Some(0));
        let flusher = Flusher::new(
            &settings,
            StoreBackend::InMemory(store.clone()),
            Arc::new(SinkStats::default()),
        );
        let (tx, rx) = async_channel::bounded(16);
        let worker = BatchWorker::new(rx, flusher, Duration::from_secs(5), size_limit, "test".into());
        Rig {
            tx,
            handle: worker.start(&Handle::current()),
            store,
        }
    }

    fn entry(time_slice: &str, payload: &str) -> Entry {
        Entry {
            time_slice: time_slice.into(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    async fn bodies(store: &InMemoryStore) -> Vec<String> {
        let mut bodies: Vec<String> = store
            .objects()
            .await
            .into_iter()
            .map(|o| String::from_utf8_lossy(&o.body).into_owned())
            .collect();
        bodies.sort();
        bodies
    }

    #[test]
    fn the_one_where_the_ticker_has_a_floor() {
        assert_eq!(tick_period(Duration::from_secs(5)), Duration::from_millis(500));
        assert_eq!(tick_period(Duration::from_millis(100)), MIN_TICK);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_three_records_wait_five_seconds_together() -> Result<()> {
        let rig = rig(InMemoryStore::new(), 32 * 1024);
        for payload in ["r1", "r2", "r3"] {
            rig.tx.send(entry("2024010100-00", payload)).await?;
        }

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(rig.store.objects().await.is_empty(), "flushed before batch_wait");

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(bodies(&rig.store).await, vec!["r1\nr2\nr3".to_string()]);

        rig.tx.close();
        rig.handle.await??;
        assert_eq!(rig.store.objects().await.len(), 1, "drain must not re-flush");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_fourth_record_starts_a_new_batch() -> Result<()> {
        // -- 📏 "aaaa\nbbbb\ncccc" is 14 bytes, over a limit of 10 by the time the 4th shows up
        let rig = rig(InMemoryStore::new(), 10);
        for payload in ["aaaa", "bbbb", "cccc", "dddd"] {
            rig.tx.send(entry("slice", payload)).await?;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bodies(&rig.store).await, vec!["aaaa\nbbbb\ncccc".to_string()]);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            bodies(&rig.store).await,
            vec!["aaaa\nbbbb\ncccc".to_string(), "dddd".to_string()]
        );

        rig.tx.close();
        rig.handle.await??;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_slices_never_share_a_batch() -> Result<()> {
        let rig = rig(InMemoryStore::new(), 32 * 1024);
        rig.tx.send(entry("00", "a")).await?;
        rig.tx.send(entry("01", "b")).await?;
        rig.tx.send(entry("00", "c")).await?;

        rig.tx.close();
        rig.handle.await??;
        assert_eq!(bodies(&rig.store).await, vec!["a\nc".to_string(), "b".to_string()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_shutdown_flushes_everything_immediately() -> Result<()> {
        let rig = rig(InMemoryStore::new(), 32 * 1024);
        rig.tx.send(entry("slice", "only")).await?;

        let started = Instant::now();
        rig.tx.close();
        rig.handle.await??;

        assert!(started.elapsed() < Duration::from_secs(5), "drain should not wait for the timer");
        assert_eq!(bodies(&rig.store).await, vec!["only".to_string()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_shutdown_waits_for_slow_uploads() -> Result<()> {
        let store = InMemoryStore::new().with_put_delay(Duration::from_secs(3));
        let rig = rig(store, 4);
        rig.tx.send(entry("slice", "12345")).await?;
        // -- 🚚 size-flush of "12345" starts now and takes 3s
        rig.tx.send(entry("slice", "tail")).await?;

        tokio::time::sleep(Duration::from_millis(10)).await;
        rig.tx.close();
        rig.handle.await??;

        assert_eq!(bodies(&rig.store).await, vec!["12345".to_string(), "tail".to_string()]);
        Ok(())
    }
}

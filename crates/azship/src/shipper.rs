// ai
//! 🚪 The Shipper: the front door. Three verbs: initialize, submit, shutdown.
//!
//! 🧠 Knowledge graph:
//! - `initialize`: resolve config → build store → spawn the `BatchWorker` → hand back a `Shipper`
//! - `submit`: timestamp → time slice (in the configured zone) → encode → bounded intake
//! - `shutdown`: close the intake, wait for the worker to drain. Twice is fine. Ten times is fine.
//! - Errors the caller sees: bad config (at initialize), bad record or closed sink (at submit).
//!   Upload trouble never comes back through here. It shows up in logs and `stats()`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::Sender;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::app_config::{AppConfig, SinkSettings};
use crate::backends::{ObjectStore, StoreBackend};
use crate::common::{Entry, EventTime};
use crate::record::{self, Record};
use crate::stats::{ShipperStats, SinkStats};
use crate::workers::{BatchWorker, Flusher, Worker};

/// 🚪 A running sink. Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct Shipper {
    settings: SinkSettings,
    tx: Sender<Entry>,
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
    stats: Arc<SinkStats>,
}

impl Shipper {
    /// 🚀 Validates `config`, builds the store, and starts the control loop.
    ///
    /// Must be called inside a Tokio runtime; outside one it returns an error. Any
    /// configuration problem is returned here and the sink never starts.
    pub fn initialize(config: &AppConfig) -> Result<Self> {
        let settings = config
            .resolve()
            .context("💀 Configuration rejected. The sink will not start.")?;
        let store = StoreBackend::from_config(&settings.destination)
            .context("💀 Could not build the object store from the destination config")?;
        Self::start(settings, store)
    }

    /// Starts a sink on an already-built store, on the Tokio runtime of the caller.
    pub fn start(settings: SinkSettings, store: StoreBackend) -> Result<Self> {
        let runtime = Handle::try_current().context(
            "💀 no Tokio runtime here. Start the sink from inside one; submit_blocking can be called from anywhere after that.",
        )?;
        info!(
            "🚀 shipper '{}' starting: store={} key={} compression={:?} wait={:?} limit={} bytes retry_limit={:?}",
            settings.instance,
            store.describe(),
            settings.key_template.as_str(),
            settings.compression,
            settings.batch_wait,
            settings.size_limit,
            settings.retry.limit
        );

        let stats = Arc::new(SinkStats::default());
        let (tx, rx) = async_channel::bounded(settings.queue_capacity);
        let flusher = Flusher::new(&settings, store, Arc::clone(&stats));
        let worker = BatchWorker::new(
            rx,
            flusher,
            settings.batch_wait,
            settings.size_limit,
            settings.instance.clone(),
        )
        .start(&runtime);

        Ok(Self {
            settings,
            tx,
            worker: Mutex::new(Some(worker)),
            stats,
        })
    }

    /// 📨 Hands one record to the sink.
    ///
    /// Waits while the intake is full. Returns an error if the record cannot be
    /// encoded or the sink has been shut down; either way nothing was buffered and
    /// the caller may try again with the same record.
    pub async fn submit(&self, record: &Record, time: EventTime) -> Result<()> {
        let entry = self.prepare(record, time)?;
        if self.tx.send(entry).await.is_err() {
            self.stats.record_rejected();
            anyhow::bail!("💀 the sink is shut down. No more records, the party is over.");
        }
        self.stats.record_submitted();
        Ok(())
    }

    /// 🧱 [`Shipper::submit`] for synchronous hosts. Blocks the calling thread while the
    /// intake is full, so never call it from an async task; use `spawn_blocking`.
    pub fn submit_blocking(&self, record: &Record, time: EventTime) -> Result<()> {
        let entry = self.prepare(record, time)?;
        if self.tx.send_blocking(entry).is_err() {
            self.stats.record_rejected();
            anyhow::bail!("💀 the sink is shut down. No more records, the party is over.");
        }
        self.stats.record_submitted();
        Ok(())
    }

    fn prepare(&self, record: &Record, time: EventTime) -> Result<Entry> {
        let time_slice = self.settings.time_slice(time.resolve());
        let payload = match record::encode(record) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("⚠️ record rejected, could not encode it: {err:#}");
                self.stats.record_rejected();
                return Err(err);
            }
        };
        trace!("📨 slice={time_slice} bytes={}", payload.len());
        Ok(Entry {
            time_slice,
            payload,
        })
    }

    /// 🏁 Stops accepting records, flushes every batch, waits for every upload.
    ///
    /// Idempotent. A second call (even a concurrent one) waits for the same drain
    /// and then returns `Ok(())`.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.close();
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.take() {
            info!("🏁 shipper '{}' shutting down, draining batches", self.settings.instance);
            handle
                .await
                .context("💀 the batch worker panicked mid-drain. Some batches may be lost.")??;
            let stats = self.stats.snapshot();
            info!(
                "✅ shipper '{}' drained: {} batches flushed, {} dropped, {} records uploaded",
                self.settings.instance,
                stats.batches_flushed,
                stats.batches_dropped,
                stats.records_flushed
            );
        }
        Ok(())
    }

    pub fn stats(&self) -> ShipperStats {
        self.stats.snapshot()
    }

    pub fn settings(&self) -> &SinkSettings {
        &self.settings
    }
}

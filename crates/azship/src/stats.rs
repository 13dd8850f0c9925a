// AI
//! 📊 Sink statistics: "did it actually upload?" answered with numbers.
//!
//! Counters are plain atomics shared between the façade (submits) and the flush
//! tasks (uploads). Nobody locks anything. `snapshot` copies them out so the host
//! can print a table without holding a reference to the live sink.

use std::sync::atomic::{AtomicU64, Ordering};

/// 🔢 The live counters. One per sink, behind an `Arc`.
#[derive(Debug, Default)]
pub(crate) struct SinkStats {
    records_submitted: AtomicU64,
    records_rejected: AtomicU64,
    batches_flushed: AtomicU64,
    records_flushed: AtomicU64,
    bytes_uploaded: AtomicU64,
    batches_dropped: AtomicU64,
    records_dropped: AtomicU64,
    upload_retries: AtomicU64,
}

impl SinkStats {
    pub(crate) fn record_submitted(&self) {
        self.records_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// ✅ A batch made it to the store.
    pub(crate) fn batch_flushed(&self, records: u64, bytes: u64) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.records_flushed.fetch_add(records, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 💀 A batch ran out of retries and is gone.
    pub(crate) fn batch_dropped(&self, records: u64) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.records_dropped.fetch_add(records, Ordering::Relaxed);
    }

    pub(crate) fn retried(&self, retries: u64) {
        self.upload_retries.fetch_add(retries, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ShipperStats {
        ShipperStats {
            records_submitted: self.records_submitted.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            upload_retries: self.upload_retries.load(Ordering::Relaxed),
        }
    }
}

/// 📸 A point-in-time copy of the sink's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipperStats {
    /// Records accepted into the intake.
    pub records_submitted: u64,
    /// Records `submit` refused (encoding errors, sink closed).
    pub records_rejected: u64,
    pub batches_flushed: u64,
    pub records_flushed: u64,
    /// Bytes on the wire, after compression.
    pub bytes_uploaded: u64,
    pub batches_dropped: u64,
    pub records_dropped: u64,
    /// Attempts beyond the first, summed over every flush.
    pub upload_retries: u64,
}

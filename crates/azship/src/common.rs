//! 🧱 The small shared shapes: what the host says time is, what an entry is,
//! and what a batch looks like while it waits for its ride to Azure.

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;
use tracing::warn;

/// ⏰ The timestamp the host attached to a record.
///
/// Hosts are inconsistent about time. Some send a proper timestamp, some send
/// Unix seconds, some send things we can't name. The last kind gets "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    Structured(DateTime<Utc>),
    UnixSeconds(u64),
    Unknown,
}

impl EventTime {
    /// Resolves to a concrete UTC instant, falling back to the current time.
    pub fn resolve(self) -> DateTime<Utc> {
        match self {
            EventTime::Structured(ts) => ts,
            EventTime::UnixSeconds(secs) => i64::try_from(secs)
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .unwrap_or_else(|| {
                    warn!("⚠️ timestamp {secs} is beyond the end of time as chrono knows it. Use current time");
                    Utc::now()
                }),
            EventTime::Unknown => {
                warn!("⚠️ timestamp isn't known format. Use current time");
                Utc::now()
            }
        }
    }
}

impl From<DateTime<Utc>> for EventTime {
    fn from(ts: DateTime<Utc>) -> Self {
        EventTime::Structured(ts)
    }
}

/// 📨 One encoded record, already sorted into its time slice. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub(crate) time_slice: String,
    pub(crate) payload: Vec<u8>,
}

/// 🪣 A not-yet-uploaded buffer for one time slice.
#[derive(Debug)]
pub(crate) struct Batch {
    pub(crate) buffer: Vec<u8>,
    pub(crate) created_at: Instant,
}

impl Batch {
    /// Seeds a fresh batch with its first payload. The clock starts now.
    pub(crate) fn seeded(payload: Vec<u8>) -> Self {
        Self {
            buffer: payload,
            created_at: Instant::now(),
        }
    }

    /// Newline, then payload. Append order is upload order.
    pub(crate) fn append(&mut self, payload: &[u8]) {
        self.buffer.reserve(payload.len() + 1);
        self.buffer.push(b'\n');
        self.buffer.extend_from_slice(payload);
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }
}

//! 🔄 Retry with jittered backoff: the "have you tried turning it off and on again" module.
//!
//! `execute` runs an operation until it succeeds or the retry budget runs out.
//! Between attempts it sleeps, and every sleep is a bit longer than the last:
//!
//! ```text
//! interval = base
//! on failure: interval += uniform[0, interval) / 2 ; sleep(interval)
//! ```
//!
//! No cap. With no limit configured, it retries until the heat death of the
//! universe or until the store comes back, whichever happens first.
//! The sleep is async, so the only thing held hostage is the flush task that asked.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tracing::debug;

/// ⏱️ How hard to try, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `None` means forever.
    pub limit: Option<u64>,
    /// Starting backoff interval.
    pub base_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: None,
            base_interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_base_interval(mut self, base_interval: Duration) -> Self {
        self.base_interval = base_interval;
        self
    }
}

/// 🎲 Grows an interval by half of a random slice of itself.
pub(crate) fn next_interval(current: Duration) -> Duration {
    let nanos = u64::try_from(current.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return current;
    }
    let jitter = rand::rng().random_range(0..nanos);
    current.saturating_add(Duration::from_nanos(jitter / 2))
}

/// 🚀 Runs `op` until it succeeds or `policy.limit` retries have failed.
///
/// With `limit = Some(n)`, `op` runs at most `n + 1` times and the last error is
/// returned. With `limit = None`, it only returns on success.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries: u64 = 0;
    let mut interval = policy.base_interval;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let budget_left = policy.limit.is_none_or(|limit| retries < limit);
        if !budget_left {
            return Err(err);
        }
        retries += 1;

        interval = next_interval(interval);
        debug!(
            "🔄 attempt failed ({err:#}), retry #{retries} in {:?}",
            interval
        );
        tokio::time::sleep(interval).await;
    }
}

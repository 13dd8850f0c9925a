//! 🧵 Workers: the background tasks that keep the sink moving.
//!
//! - `batch_worker`: the one control loop. Owns every live batch, decides when
//!   each one is done, dispatches flushes, drains on shutdown.
//! - `flusher`: what a single flush does. Key, compress, retry, upload, count.
//!
//! 🔒 Not public. The façade in `shipper` is the only way in.

use anyhow::Result;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

mod batch_worker;
mod flusher;

pub(crate) use batch_worker::BatchWorker;
pub(crate) use flusher::Flusher;

// A background worker, that does work. duh.
pub(crate) trait Worker {
    fn start(self, runtime: &Handle) -> JoinHandle<Result<()>>;
}

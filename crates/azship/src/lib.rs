//! 📦 azship: structured log records in, time-sliced blobs out.
//!
//! Records are encoded to JSON lines, grouped by time slice, and uploaded as one
//! object per batch when the batch gets old enough or big enough. Uploads retry
//! with jittered backoff. Shutdown drains everything before it returns.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use azship::{EventTime, Record, Shipper, load_config};
//!
//! let config = load_config(Some(std::path::Path::new("azship.toml")))?;
//! let shipper = Shipper::initialize(&config)?;
//! shipper
//!     .submit(&Record::new().with("msg", "hello"), EventTime::Unknown)
//!     .await?;
//! shipper.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod app_config;
pub mod backends;
pub mod common;
pub mod compression;
pub mod object_key;
pub mod record;
pub mod retry;
pub mod shipper;
mod stats;
mod workers;

pub use app_config::{AppConfig, SinkSettings, SliceTimeZone, load_config};
pub use backends::{ContentOptions, DestinationConfig, ObjectStore, StoreBackend};
pub use common::EventTime;
pub use compression::Compression;
pub use record::{Record, Value};
pub use retry::RetryPolicy;
pub use shipper::Shipper;
pub use stats::ShipperStats;

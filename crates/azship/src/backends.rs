//! 🔌 Backends: the object-store boundary, where batches stop being our problem.
//!
//! 🚰 The engine only ever asks two questions of a store: "does the container
//! exist (and if not, please make it)" and "please put these bytes at this key".
//! Everything else (HTTP, auth, block staging) hides behind the trait.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls (`AzureBlobStore`, `InMemoryStore`) → `StoreBackend` enum
//! - Config co-located with each backend, resolved through `DestinationConfig`
//! - Stores are I/O only. No retries here. The flusher owns retries, timeouts, and feelings.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

pub mod azure;
pub mod in_mem;

pub use azure::{AzureBlobConfig, AzureBlobStore};
pub use in_mem::{InMemoryStore, InMemoryStoreConfig, StoredObject};

/// 🏷️ Per-upload content metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentOptions {
    pub content_type: String,
}

/// 🕳️ A place batches go to live forever (or until the retention policy says otherwise).
///
/// # Contract 📜
/// - `ensure_destination_exists` is idempotent. Not-found → create. "Someone else
///   created it first" is success, not an error.
/// - `put_object` writes the whole body at `key`, overwriting whatever was there.
///   Retries of one flush reuse one key, so overwrite is the whole idempotency story.
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    async fn ensure_destination_exists(&self) -> Result<()>;
    async fn put_object(&self, key: &str, body: Vec<u8>, options: &ContentOptions) -> Result<()>;
    /// Where this store points, with secrets left out. For logs.
    fn describe(&self) -> String;
}

/// 🎭 The config-side casting call: which store, and how to reach it.
#[derive(Debug, Deserialize, Clone)]
pub enum DestinationConfig {
    // -- 🔡 lowercase aliases: figment lowercases env var keys
    #[serde(alias = "azure")]
    Azure(AzureBlobConfig),
    #[serde(alias = "in_memory", alias = "inmemory")]
    InMemory(InMemoryStoreConfig),
}

impl DestinationConfig {
    pub fn auto_create_container(&self) -> bool {
        match self {
            DestinationConfig::Azure(c) => c.auto_create_container,
            DestinationConfig::InMemory(c) => c.auto_create_container,
        }
    }
}

/// 🎭 The many faces of a store. Cheap to clone: every flush task gets its own handle.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Azure(AzureBlobStore),
    InMemory(InMemoryStore),
}

impl StoreBackend {
    /// 🏗️ Builds the store a config describes. Bad credentials die here, not at the first flush.
    pub fn from_config(config: &DestinationConfig) -> Result<Self> {
        Ok(match config {
            DestinationConfig::Azure(c) => StoreBackend::Azure(AzureBlobStore::new(c)?),
            DestinationConfig::InMemory(_) => StoreBackend::InMemory(InMemoryStore::new()),
        })
    }
}

#[async_trait]
impl ObjectStore for StoreBackend {
    async fn ensure_destination_exists(&self) -> Result<()> {
        match self {
            StoreBackend::Azure(store) => store.ensure_destination_exists().await,
            StoreBackend::InMemory(store) => store.ensure_destination_exists().await,
        }
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, options: &ContentOptions) -> Result<()> {
        match self {
            StoreBackend::Azure(store) => store.put_object(key, body, options).await,
            StoreBackend::InMemory(store) => store.put_object(key, body, options).await,
        }
    }

    fn describe(&self) -> String {
        match self {
            StoreBackend::Azure(store) => store.describe(),
            StoreBackend::InMemory(store) => store.describe(),
        }
    }
}

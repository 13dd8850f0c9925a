//! # Previously, on azship...
//!
//! 🎬 The blobs needed somewhere to go that wasn't Azure. Somewhere with no
//! network, no credentials, no 503s (unless you ask nicely for some).
//!
//! `in_mem` keeps every uploaded object in a `Vec` behind an `Arc<Mutex<...>>`,
//! so tests can hand one clone to the engine and keep another to peek at what
//! arrived. It can also pretend to be broken (`fail_next_puts`), pretend the
//! container is missing (`without_container`), and pretend to be slow
//! (`with_put_delay`).
//!
//! ⚠️ Selectable from config as `[destination.InMemory]` for dry runs. Everything
//! vanishes when the process exits. That's the feature.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::backends::{ContentOptions, ObjectStore};

/// 🔧 Config for the in-memory store. There is almost nothing to configure. Bliss.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InMemoryStoreConfig {
    #[serde(default)]
    pub auto_create_container: bool,
}

/// 📦 One object as it landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug)]
struct InMemoryState {
    objects: tokio::sync::Mutex<Vec<StoredObject>>,
    attempted_keys: tokio::sync::Mutex<Vec<String>>,
    container_exists: AtomicBool,
    failures_to_inject: AtomicU64,
    put_delay_ms: AtomicU64,
    put_attempts: AtomicU64,
    existence_checks: AtomicU64,
    containers_created: AtomicU64,
}

/// 📦 A store that never forgets (until drop). Clones share the same state.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<InMemoryState>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// A store whose container already exists.
    pub fn new() -> Self {
        Self {
            state: Arc::new(InMemoryState {
                objects: tokio::sync::Mutex::new(Vec::new()),
                attempted_keys: tokio::sync::Mutex::new(Vec::new()),
                container_exists: AtomicBool::new(true),
                failures_to_inject: AtomicU64::new(0),
                put_delay_ms: AtomicU64::new(0),
                put_attempts: AtomicU64::new(0),
                existence_checks: AtomicU64::new(0),
                containers_created: AtomicU64::new(0),
            }),
        }
    }

    /// A store whose container has not been created yet. Puts fail until someone creates it.
    pub fn without_container() -> Self {
        let store = Self::new();
        store.state.container_exists.store(false, Ordering::SeqCst);
        store
    }

    /// Every put sleeps this long first. For watching shutdown wait on in-flight uploads.
    pub fn with_put_delay(self, delay: Duration) -> Self {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.put_delay_ms.store(millis, Ordering::SeqCst);
        self
    }

    /// 💀 The next `n` puts fail. `u64::MAX` is close enough to "forever".
    pub fn fail_next_puts(&self, n: u64) {
        self.state.failures_to_inject.store(n, Ordering::SeqCst);
    }

    pub async fn objects(&self) -> Vec<StoredObject> {
        self.state.objects.lock().await.clone()
    }

    /// Every key a put was attempted for, failures included, in order.
    pub async fn attempted_keys(&self) -> Vec<String> {
        self.state.attempted_keys.lock().await.clone()
    }

    pub fn put_attempts(&self) -> u64 {
        self.state.put_attempts.load(Ordering::SeqCst)
    }

    pub fn existence_checks(&self) -> u64 {
        self.state.existence_checks.load(Ordering::SeqCst)
    }

    pub fn containers_created(&self) -> u64 {
        self.state.containers_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn ensure_destination_exists(&self) -> Result<()> {
        self.state.existence_checks.fetch_add(1, Ordering::SeqCst);
        // -- 🔒 compare_exchange so two racing flushes create it exactly once
        if self
            .state
            .container_exists
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.state.containers_created.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, options: &ContentOptions) -> Result<()> {
        self.state.put_attempts.fetch_add(1, Ordering::SeqCst);
        self.state.attempted_keys.lock().await.push(key.to_string());

        let delay = self.state.put_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let injected = self
            .state
            .failures_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if injected.is_ok() {
            anyhow::bail!("💀 injected failure: the in-memory store is having a moment");
        }

        if !self.state.container_exists.load(Ordering::SeqCst) {
            anyhow::bail!("💀 ContainerNotFound: the in-memory container does not exist (yet)");
        }

        // -- 📦 overwrite semantics, same as a real blob store
        let mut objects = self.state.objects.lock().await;
        let stored = StoredObject {
            key: key.to_string(),
            body,
            content_type: options.content_type.clone(),
        };
        match objects.iter_mut().find(|o| o.key == key) {
            Some(existing) => *existing = stored,
            None => objects.push(stored),
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text() -> ContentOptions {
        ContentOptions {
            content_type: "text/plain".into(),
        }
    }

    #[tokio::test]
    async fn the_one_where_puts_land_and_overwrite() -> Result<()> {
        let store = InMemoryStore::new();
        store.put_object("a", b"one".to_vec(), &text()).await?;
        store.put_object("a", b"two".to_vec(), &text()).await?;
        store.put_object("b", b"three".to_vec(), &text()).await?;

        let objects = store.objects().await;
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].body, b"two".to_vec());
        assert_eq!(store.put_attempts(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_injected_failures_run_out() -> Result<()> {
        let store = InMemoryStore::new();
        store.fail_next_puts(2);
        assert!(store.put_object("k", vec![], &text()).await.is_err());
        assert!(store.put_object("k", vec![], &text()).await.is_err());
        store.put_object("k", vec![], &text()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_container_appears_once() -> Result<()> {
        let store = InMemoryStore::without_container();
        assert!(store.put_object("k", vec![], &text()).await.is_err());
        store.ensure_destination_exists().await?;
        store.ensure_destination_exists().await?;
        store.put_object("k", vec![], &text()).await?;
        assert_eq!(store.existence_checks(), 2);
        assert_eq!(store.containers_created(), 1);
        Ok(())
    }
}

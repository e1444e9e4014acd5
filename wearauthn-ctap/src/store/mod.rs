//! Persistent state shared by every connection
//!
//! All data lives in a [`KeyValueStore`] split into namespaces. Each logical
//! store below owns its namespaces and, where read-modify-write sequences
//! must not interleave, its own mutex.

mod cache;
mod counters;
mod memory;
mod resident;

pub use cache::{CredentialCache, Preferences};
pub use counters::CounterStore;
pub use memory::MemoryStore;
pub use resident::ResidentCredentialStore;

use crate::status::StatusCode;

use std::sync::Arc;

/// Errors raised by the persistent store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to commit namespace {namespace:?}: {reason}")]
    Commit { namespace: String, reason: String },

    #[error("corrupt value under {namespace:?}/{key:?}")]
    Corrupt { namespace: String, key: String },

    #[error("signature counter for {0:?} would overflow")]
    CounterOverflow(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for StatusCode {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "persistent store failure");
        StatusCode::Other
    }
}

pub type Result<T> = core::result::Result<T, StoreError>;

/// Synchronous string key-value storage, partitioned by namespace
///
/// Writes become durable on [`KeyValueStore::commit`].
pub trait KeyValueStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Option<String>;

    fn put(&self, namespace: &str, key: &str, value: String);

    fn remove(&self, namespace: &str, key: &str);

    /// All keys currently present in `namespace`
    fn keys(&self, namespace: &str) -> Vec<String>;

    fn clear(&self, namespace: &str);

    fn commit(&self, namespace: &str) -> Result<()>;
}

/// Bundle of the stores the authenticator uses
pub struct CredentialStore {
    pub counters: CounterStore,
    pub resident: ResidentCredentialStore,
    pub cache: CredentialCache,
    pub preferences: Preferences,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            counters: CounterStore::new(kv.clone()),
            resident: ResidentCredentialStore::new(kv.clone()),
            cache: CredentialCache::new(kv.clone()),
            preferences: Preferences::new(kv),
        }
    }

    /// Backed by a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Every key alias the stores refer to
    pub fn known_key_aliases(&self) -> Result<Vec<String>> {
        let mut aliases = self.counters.aliases();
        if let Some(cached) = self.cache.peek()? {
            aliases.push(cached);
        }
        aliases.sort();
        aliases.dedup();
        Ok(aliases)
    }

    /// Drop counters, the cached key and every resident partition
    pub fn wipe(&self) -> Result<()> {
        self.counters.clear()?;
        self.cache.clear()?;
        self.resident.clear()
    }
}

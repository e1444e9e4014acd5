use super::{KeyValueStore, Result, StoreError};

use std::sync::{Arc, Mutex};

const NAMESPACE: &str = "counters";

/// Per-credential signature counters
///
/// A counter exists exactly as long as its credential is valid, so presence of
/// an entry doubles as the validity check for non-resident key handles.
pub struct CounterStore {
    kv: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl CounterStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            lock: Mutex::new(()),
        }
    }

    fn read(&self, key_alias: &str) -> Result<Option<u32>> {
        self.kv
            .get(NAMESPACE, key_alias)
            .map(|value| {
                value.parse().map_err(|_| StoreError::Corrupt {
                    namespace: NAMESPACE.to_string(),
                    key: key_alias.to_string(),
                })
            })
            .transpose()
    }

    pub fn init(&self, key_alias: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.kv.put(NAMESPACE, key_alias, 0.to_string());
        self.kv.commit(NAMESPACE)
    }

    /// Increment and return the new value, or `None` if the alias has no counter
    pub fn atomically_increment(&self, key_alias: &str) -> Result<Option<u32>> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(current) = self.read(key_alias)? else {
            return Ok(None);
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::CounterOverflow(key_alias.to_string()))?;
        self.kv.put(NAMESPACE, key_alias, next.to_string());
        self.kv.commit(NAMESPACE)?;
        Ok(Some(next))
    }

    pub fn contains(&self, key_alias: &str) -> bool {
        self.kv.get(NAMESPACE, key_alias).is_some()
    }

    pub fn delete(&self, key_alias: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.kv.remove(NAMESPACE, key_alias);
        self.kv.commit(NAMESPACE)
    }

    pub fn aliases(&self) -> Vec<String> {
        self.kv.keys(NAMESPACE)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.kv.clear(NAMESPACE);
        self.kv.commit(NAMESPACE)
    }
}

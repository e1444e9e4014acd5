use super::{KeyValueStore, Result};

use std::collections::BTreeMap;
use std::sync::Mutex;

/// [`KeyValueStore`] kept in process memory
///
/// Commits are no-ops. Useful for tests and for devices without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut BTreeMap<String, BTreeMap<String, String>>) -> R) -> R {
        let mut guard = match self.namespaces.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Option<String> {
        self.with(|ns| ns.get(namespace).and_then(|entries| entries.get(key).cloned()))
    }

    fn put(&self, namespace: &str, key: &str, value: String) {
        self.with(|ns| {
            ns.entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), value);
        });
    }

    fn remove(&self, namespace: &str, key: &str) {
        self.with(|ns| {
            if let Some(entries) = ns.get_mut(namespace) {
                entries.remove(key);
            }
        });
    }

    fn keys(&self, namespace: &str) -> Vec<String> {
        self.with(|ns| {
            ns.get(namespace)
                .map(|entries| entries.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn clear(&self, namespace: &str) {
        self.with(|ns| {
            ns.remove(namespace);
        });
    }

    fn commit(&self, _namespace: &str) -> Result<()> {
        Ok(())
    }
}

use super::{KeyValueStore, Result, StoreError};

use std::sync::{Arc, Mutex};

const NAMESPACE: &str = "default";
const CACHED_ALIAS_KEY: &str = "cached_credential_key_alias";
const USE_PLATFORM_ATTESTATION_KEY: &str = "use_platform_attestation";

/// A single pre-generated key alias for low-latency NFC registrations
pub struct CredentialCache {
    kv: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl CredentialCache {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            lock: Mutex::new(()),
        }
    }

    /// Read and clear the cached alias as one step
    pub fn take(&self) -> Result<Option<String>> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let alias = self.kv.get(NAMESPACE, CACHED_ALIAS_KEY);
        if alias.is_some() {
            self.kv.remove(NAMESPACE, CACHED_ALIAS_KEY);
            self.kv.commit(NAMESPACE)?;
        }
        Ok(alias)
    }

    pub fn peek(&self) -> Result<Option<String>> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.kv.get(NAMESPACE, CACHED_ALIAS_KEY))
    }

    /// Store `alias` unless the cache is already filled; returns whether it was stored
    pub fn fill(&self, alias: &str) -> Result<bool> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        if self.kv.get(NAMESPACE, CACHED_ALIAS_KEY).is_some() {
            return Ok(false);
        }
        self.kv.put(NAMESPACE, CACHED_ALIAS_KEY, alias.to_string());
        self.kv.commit(NAMESPACE)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.kv.remove(NAMESPACE, CACHED_ALIAS_KEY);
        self.kv.commit(NAMESPACE)
    }
}

/// Device-lifetime settings
pub struct Preferences {
    kv: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Whether new keys should request a platform attestation chain (default on)
    pub fn use_platform_attestation(&self) -> bool {
        self.kv
            .get(NAMESPACE, USE_PLATFORM_ATTESTATION_KEY)
            .is_none_or(|value| value != "false")
    }

    pub fn set_use_platform_attestation(&self, enabled: bool) -> Result<()> {
        self.kv
            .put(NAMESPACE, USE_PLATFORM_ATTESTATION_KEY, enabled.to_string());
        self.kv.commit(NAMESPACE)
    }
}

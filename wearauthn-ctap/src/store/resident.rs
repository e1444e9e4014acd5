use super::{KeyValueStore, Result};

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const REGISTRY: &str = "rp_id_hashes";
const PARTITION_PREFIX: &str = "rp_id_hash_";
const USER_ID_PREFIX: &str = "uid+";
const KEY_HANDLE_PREFIX: &str = "kh+";
const PRESENT: &str = "true";

fn partition(rp_id_hash: &[u8; 32]) -> String {
    format!("{PARTITION_PREFIX}{}", STANDARD.encode(rp_id_hash))
}

fn user_key(user_id: &[u8]) -> String {
    format!("{USER_ID_PREFIX}{}", STANDARD.encode(user_id))
}

fn key_handle_key(key_handle: &[u8]) -> String {
    format!("{KEY_HANDLE_PREFIX}{}", STANDARD.encode(key_handle))
}

/// Resident credential records, one partition per relying party
///
/// Each record is reachable by user id and by key handle. A registry of all
/// partitions makes a full wipe possible without enumerating namespaces.
pub struct ResidentCredentialStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ResidentCredentialStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Store `record` for `user_id`
    ///
    /// `replaced_key_handle` names the handle of a record being overwritten so
    /// that it stops resolving.
    pub fn put(
        &self,
        rp_id_hash: &[u8; 32],
        user_id: &[u8],
        key_handle: &[u8],
        record: String,
        replaced_key_handle: Option<&[u8]>,
    ) -> Result<()> {
        let namespace = partition(rp_id_hash);
        if let Some(old) = replaced_key_handle {
            self.kv.remove(&namespace, &key_handle_key(old));
        }
        self.kv.put(&namespace, &user_key(user_id), record);
        self.kv
            .put(&namespace, &key_handle_key(key_handle), STANDARD.encode(user_id));
        self.kv.commit(&namespace)?;

        self.kv
            .put(REGISTRY, &STANDARD.encode(rp_id_hash), PRESENT.to_string());
        self.kv.commit(REGISTRY)
    }

    pub fn get(&self, rp_id_hash: &[u8; 32], user_id: &[u8]) -> Option<String> {
        self.kv.get(&partition(rp_id_hash), &user_key(user_id))
    }

    pub fn user_id_for_key_handle(
        &self,
        rp_id_hash: &[u8; 32],
        key_handle: &[u8],
    ) -> Option<Vec<u8>> {
        let encoded = self
            .kv
            .get(&partition(rp_id_hash), &key_handle_key(key_handle))?;
        STANDARD.decode(encoded).ok()
    }

    /// User ids with a resident credential for `rp_id_hash`
    pub fn user_ids(&self, rp_id_hash: &[u8; 32]) -> Vec<Vec<u8>> {
        self.kv
            .keys(&partition(rp_id_hash))
            .iter()
            .filter_map(|key| key.strip_prefix(USER_ID_PREFIX))
            .filter_map(|encoded| STANDARD.decode(encoded).ok())
            .collect()
    }

    pub fn is_registered(&self, rp_id_hash: &[u8; 32]) -> bool {
        self.kv.get(REGISTRY, &STANDARD.encode(rp_id_hash)).is_some()
    }

    /// Remove every partition listed in the registry, then the registry
    pub fn clear(&self) -> Result<()> {
        for encoded in self.kv.keys(REGISTRY) {
            let namespace = format!("{PARTITION_PREFIX}{encoded}");
            self.kv.clear(&namespace);
            self.kv.commit(&namespace)?;
        }
        self.kv.clear(REGISTRY);
        self.kv.commit(REGISTRY)
    }
}

//! Credentials and their key handles
//!
//! A non-resident credential is rebuilt entirely from its key handle:
//!
//! ```text
//! mac (32) | flags (1) | alias length (1) | key alias | RP name (UTF-8, WebAuthn only)
//! ```
//!
//! `mac` is HMAC-SHA-256 under the authenticator's key-handle secret over the
//! RP ID hash followed by the rest of the handle, so a handle only resolves for
//! the relying party it was issued to.

use crate::callbacks::{KeyStoreError, SecureKeyStore};
use crate::cbor;
use crate::status::{Result, StatusCode};
use crate::types::{MAX_DISPLAY_LEN, PUBLIC_KEY_TYPE, PublicKeyCredentialDescriptor};

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use wearauthn_crypto::pin_protocol::hmac_sha256;

const MAC_LEN: usize = 32;
const HEADER_LEN: usize = MAC_LEN + 2;

/// Longest key alias a key store may hand out
pub const MAX_KEY_ALIAS_LEN: usize = 31;

/// Longest RP name fragment embedded in a key handle, in bytes
const MAX_RP_NAME_FRAGMENT: usize = 3 * MAX_DISPLAY_LEN;

/// Upper bound on any key handle this authenticator issues
pub const MAX_CREDENTIAL_ID_LEN: usize = MAC_LEN + 32 + 1 + MAX_RP_NAME_FRAGMENT;

mod flags {
    pub const U2F: u8 = 0x01;
    pub const HMAC_SECRET: u8 = 0x02;
}

/// Milliseconds since the Unix epoch, used to order resident credentials
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Cut `value` to at most `max` bytes on a character boundary
fn truncate_bytes(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Build an authenticated key handle
pub fn encode_key_handle(
    secret: &[u8; 32],
    rp_id_hash: &[u8; 32],
    u2f: bool,
    has_hmac_secret: bool,
    key_alias: &str,
    rp_name: Option<&str>,
) -> Result<Vec<u8>> {
    if key_alias.is_empty() || key_alias.len() > MAX_KEY_ALIAS_LEN {
        tracing::error!(len = key_alias.len(), "key store returned an unusable alias");
        return Err(StatusCode::Other);
    }

    let mut flag_byte = 0;
    if u2f {
        flag_byte |= flags::U2F;
    }
    if has_hmac_secret {
        flag_byte |= flags::HMAC_SECRET;
    }

    let mut body = vec![flag_byte, key_alias.len() as u8];
    body.extend_from_slice(key_alias.as_bytes());
    if !u2f && let Some(name) = rp_name {
        body.extend_from_slice(truncate_bytes(name, MAX_RP_NAME_FRAGMENT).as_bytes());
    }

    let mac = hmac_sha256(secret, &[rp_id_hash.as_slice(), body.as_slice()])?;
    let mut handle = Vec::with_capacity(MAC_LEN + body.len());
    handle.extend_from_slice(&mac);
    handle.extend_from_slice(&body);
    Ok(handle)
}

/// Rebuild the credential a key handle describes
///
/// Returns `None` for handles that were not issued for `rp_id_hash` by an
/// authenticator holding `secret`.
pub fn decode_key_handle(
    secret: &[u8; 32],
    rp_id_hash: &[u8; 32],
    key_handle: &[u8],
) -> Option<Credential> {
    if key_handle.len() < HEADER_LEN || key_handle.len() > MAX_CREDENTIAL_ID_LEN {
        return None;
    }
    let (mac, body) = key_handle.split_at(MAC_LEN);
    let expected = hmac_sha256(secret, &[rp_id_hash.as_slice(), body]).ok()?;
    if !bool::from(expected[..].ct_eq(mac)) {
        return None;
    }

    let flag_byte = body[0];
    let alias_len = body[1] as usize;
    let alias = body.get(2..2 + alias_len)?;
    let key_alias = std::str::from_utf8(alias).ok()?.to_string();
    let rest = &body[2 + alias_len..];

    if flag_byte & flags::U2F != 0 {
        return Some(Credential::U2f(U2fCredential {
            key_alias,
            app_id_hash: *rp_id_hash,
            key_handle: key_handle.to_vec(),
        }));
    }

    let rp_name = match rest {
        [] => None,
        name => Some(std::str::from_utf8(name).ok()?.to_string()),
    };
    Some(Credential::WebAuthn(WebAuthnCredential {
        key_alias,
        rp_id_hash: *rp_id_hash,
        key_handle: key_handle.to_vec(),
        rp_name,
        user_id: None,
        user_info: UserInfo::default(),
        is_resident: false,
        has_hmac_secret: flag_byte & flags::HMAC_SECRET != 0,
        creation_date: 0,
    }))
}

/// User name and display name of a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInfo {
    Plain {
        name: Option<String>,
        display_name: Option<String>,
    },
    /// Encrypted by the key store; readable only after user verification
    Sealed(Vec<u8>),
}

impl Default for UserInfo {
    fn default() -> Self {
        Self::Plain {
            name: None,
            display_name: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlainUserInfo {
    name: Option<String>,
    display_name: Option<String>,
}

/// Stored form of a resident credential
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResidentRecord {
    key_alias: String,
    #[serde(with = "serde_bytes")]
    key_handle: Vec<u8>,
    rp_name: Option<String>,
    #[serde(with = "serde_bytes")]
    user_id: Vec<u8>,
    user_name: Option<String>,
    user_display_name: Option<String>,
    #[serde(default, with = "serde_bytes")]
    sealed_user_info: Option<Vec<u8>>,
    has_hmac_secret: bool,
    creation_date: u64,
}

/// CTAP2 credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAuthnCredential {
    pub key_alias: String,
    pub rp_id_hash: [u8; 32],
    pub key_handle: Vec<u8>,
    pub rp_name: Option<String>,
    /// Present for resident credentials
    pub user_id: Option<Vec<u8>>,
    pub user_info: UserInfo,
    pub is_resident: bool,
    pub has_hmac_secret: bool,
    pub creation_date: u64,
}

impl WebAuthnCredential {
    /// Serialize for the resident store
    pub fn to_record(&self) -> Result<String> {
        let user_id = self.user_id.clone().ok_or_else(|| {
            tracing::error!("attempted to store a credential without user id");
            StatusCode::Other
        })?;
        let (user_name, user_display_name, sealed_user_info) = match &self.user_info {
            UserInfo::Plain { name, display_name } => (name.clone(), display_name.clone(), None),
            UserInfo::Sealed(sealed) => (None, None, Some(sealed.clone())),
        };

        let record = ResidentRecord {
            key_alias: self.key_alias.clone(),
            key_handle: self.key_handle.clone(),
            rp_name: self.rp_name.clone(),
            user_id,
            user_name,
            user_display_name,
            sealed_user_info,
            has_hmac_secret: self.has_hmac_secret,
            creation_date: self.creation_date,
        };
        Ok(STANDARD.encode(cbor::encode(&record)?))
    }

    /// Inverse of [`WebAuthnCredential::to_record`]
    pub fn from_record(rp_id_hash: &[u8; 32], record: &str) -> Option<Self> {
        let raw = STANDARD.decode(record).ok()?;
        let record: ResidentRecord = cbor::decode(&raw).ok()?;
        let user_info = match record.sealed_user_info {
            Some(sealed) => UserInfo::Sealed(sealed),
            None => UserInfo::Plain {
                name: record.user_name,
                display_name: record.user_display_name,
            },
        };

        Some(Self {
            key_alias: record.key_alias,
            rp_id_hash: *rp_id_hash,
            key_handle: record.key_handle,
            rp_name: record.rp_name,
            user_id: Some(record.user_id),
            user_info,
            is_resident: true,
            has_hmac_secret: record.has_hmac_secret,
            creation_date: record.creation_date,
        })
    }

    /// Encrypt the user's names so that reading them requires verification
    pub async fn seal_user_info<K: SecureKeyStore + ?Sized>(
        &mut self,
        key_store: &K,
    ) -> core::result::Result<(), KeyStoreError> {
        let UserInfo::Plain { name, display_name } = &self.user_info else {
            return Ok(());
        };
        let plain = PlainUserInfo {
            name: name.clone(),
            display_name: display_name.clone(),
        };
        let encoded =
            cbor::encode(&plain).map_err(|err| KeyStoreError::Backend(err.to_string()))?;
        let sealed = key_store.seal_user_info(&self.key_alias, &encoded).await?;
        self.user_info = UserInfo::Sealed(sealed);
        Ok(())
    }

    pub async fn unlock_user_info<K: SecureKeyStore + ?Sized>(
        &mut self,
        key_store: &K,
    ) -> core::result::Result<(), KeyStoreError> {
        let UserInfo::Sealed(sealed) = &self.user_info else {
            return Ok(());
        };
        let encoded = key_store.unseal_user_info(&self.key_alias, sealed).await?;
        let plain: PlainUserInfo =
            cbor::decode(&encoded).map_err(|err| KeyStoreError::Backend(err.to_string()))?;
        self.user_info = UserInfo::Plain {
            name: plain.name,
            display_name: plain.display_name,
        };
        Ok(())
    }

    pub fn user_name(&self) -> Option<&str> {
        match &self.user_info {
            UserInfo::Plain { name, .. } => name.as_deref(),
            UserInfo::Sealed(_) => None,
        }
    }

    pub fn user_display_name(&self) -> Option<&str> {
        match &self.user_info {
            UserInfo::Plain { display_name, .. } => display_name.as_deref(),
            UserInfo::Sealed(_) => None,
        }
    }
}

/// Credential registered through the legacy U2F interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct U2fCredential {
    pub key_alias: String,
    pub app_id_hash: [u8; 32],
    pub key_handle: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    WebAuthn(WebAuthnCredential),
    U2f(U2fCredential),
}

impl Credential {
    pub fn key_alias(&self) -> &str {
        match self {
            Self::WebAuthn(c) => &c.key_alias,
            Self::U2f(c) => &c.key_alias,
        }
    }

    pub fn rp_id_hash(&self) -> &[u8; 32] {
        match self {
            Self::WebAuthn(c) => &c.rp_id_hash,
            Self::U2f(c) => &c.app_id_hash,
        }
    }

    pub fn key_handle(&self) -> &[u8] {
        match self {
            Self::WebAuthn(c) => &c.key_handle,
            Self::U2f(c) => &c.key_handle,
        }
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, Self::WebAuthn(c) if c.is_resident)
    }

    pub fn has_hmac_secret(&self) -> bool {
        matches!(self, Self::WebAuthn(c) if c.has_hmac_secret)
    }

    pub fn user_id(&self) -> Option<&[u8]> {
        match self {
            Self::WebAuthn(c) => c.user_id.as_deref(),
            Self::U2f(_) => None,
        }
    }

    pub fn user_name(&self) -> Option<&str> {
        match self {
            Self::WebAuthn(c) => c.user_name(),
            Self::U2f(_) => None,
        }
    }

    pub fn user_display_name(&self) -> Option<&str> {
        match self {
            Self::WebAuthn(c) => c.user_display_name(),
            Self::U2f(_) => None,
        }
    }

    pub fn creation_date(&self) -> u64 {
        match self {
            Self::WebAuthn(c) => c.creation_date,
            Self::U2f(_) => 0,
        }
    }

    pub fn descriptor(&self) -> PublicKeyCredentialDescriptor {
        PublicKeyCredentialDescriptor {
            cred_type: PUBLIC_KEY_TYPE.to_string(),
            id: self.key_handle().to_vec(),
        }
    }
}

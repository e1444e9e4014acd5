//! Collaborator traits for the secure key store and the user-facing surface
//!
//! Both traits are asynchronous: every call may wait on hardware or on the
//! person wearing the device. Implementations must be cancellation safe.
//! Dropping a pending future (for example because the transport went away)
//! has to dismiss whatever dialog it opened.

use async_trait::async_trait;

use crate::credential::Credential;
use crate::request_info::RequestInfo;
use crate::status::StatusCode;
use crate::types::AttestationType;

/// Outcome of a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpResult {
    Denied,
    Accepted,
    /// Nobody answered in time
    Timeout,
}

impl UpResult {
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// Conditions the transport layer reports to the user outside a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialStatus {
    /// Reset was requested but declined
    Reset,
    /// A key needs a fresh screen-lock confirmation that cannot be shown on this transport
    UserNotAuthenticated,
}

/// Secure key store failures
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    /// The key is bound to a recent user authentication that has expired
    ///
    /// This is the one recoverable condition: the caller may confirm the
    /// device credential once and retry.
    #[error("key requires recent user authentication")]
    ReauthenticationRequired,

    #[error("key alias {0:?} not found")]
    KeyNotFound(String),

    #[error("key store failure: {0}")]
    Backend(String),
}

impl From<KeyStoreError> for StatusCode {
    fn from(err: KeyStoreError) -> Self {
        tracing::warn!(error = %err, "key store operation failed");
        match err {
            KeyStoreError::ReauthenticationRequired => StatusCode::OperationDenied,
            KeyStoreError::KeyNotFound(_) => StatusCode::NoCredentials,
            KeyStoreError::Backend(_) => StatusCode::Other,
        }
    }
}

/// Hardware-backed key storage
///
/// Private keys never leave the store. The authenticator refers to keys by
/// alias only.
#[async_trait]
pub trait SecureKeyStore: Send + Sync {
    /// Create a fresh ES256 credential key
    ///
    /// # Arguments
    ///
    /// * `resident` - The key backs a discoverable credential
    /// * `hmac_secret` - Also provision a per-credential HMAC secret
    /// * `attestation_challenge` - Challenge to embed in a platform attestation chain
    ///
    /// # Returns
    ///
    /// The new key's alias (at most 31 bytes) and the attestation it supports,
    /// or `None` if no key could be created.
    async fn generate(
        &self,
        resident: bool,
        hmac_secret: bool,
        attestation_challenge: Option<&[u8]>,
    ) -> Option<(String, AttestationType)>;

    /// ES256 signature (DER) over the concatenation of `data`
    async fn sign(&self, key_alias: &str, data: &[&[u8]]) -> Result<Vec<u8>, KeyStoreError>;

    /// Public key as an uncompressed SEC1 point
    async fn public_key(&self, key_alias: &str) -> Option<Vec<u8>>;

    /// Certificate chain issued for the key, leaf first
    async fn attestation_chain(&self, key_alias: &str) -> Result<Vec<Vec<u8>>, KeyStoreError>;

    async fn delete(&self, key_alias: &str);

    /// HMAC-SHA-256 of `salt` under the credential's hmac-secret
    ///
    /// `user_verified` selects between the two secrets CTAP2 keeps per
    /// credential. `Ok(None)` means the key has no hmac-secret.
    async fn hmac_secret(
        &self,
        key_alias: &str,
        user_verified: bool,
        salt: &[u8],
    ) -> Result<Option<[u8; 32]>, KeyStoreError>;

    /// Encrypt user metadata under a key bound to user verification
    async fn seal_user_info(&self, key_alias: &str, plaintext: &[u8])
    -> Result<Vec<u8>, KeyStoreError>;

    /// Reverse of [`SecureKeyStore::seal_user_info`]
    async fn unseal_user_info(&self, key_alias: &str, sealed: &[u8])
    -> Result<Vec<u8>, KeyStoreError>;

    /// The key lives in a TEE or secure element
    fn is_hardware_backed(&self, key_alias: &str) -> bool;

    /// Whether a screen lock is configured and recently confirmed
    ///
    /// `Ok(None)` means no verification method is configured at all. With
    /// `obey_timeout`, an expired confirmation yields
    /// `Err(KeyStoreError::ReauthenticationRequired)`.
    fn verification_state(&self, obey_timeout: bool) -> Result<Option<bool>, KeyStoreError>;

    fn device_locked(&self) -> bool;
}

/// Dialogs and notifications on the device
#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// Fire-and-forget success notification
    fn notify(&self, info: &RequestInfo);

    /// Ask the user to approve `info`
    async fn confirm(&self, info: &RequestInfo) -> UpResult;

    /// Show a transaction text and return the text actually displayed
    ///
    /// `None` on decline or timeout.
    async fn confirm_transaction(&self, rp_id: &str, prompt: &str) -> Option<String>;

    /// Let the user pick one of several resident credentials
    ///
    /// Returns the index into `candidates`, or `None` if nothing was picked.
    async fn choose_credential(&self, candidates: &[Credential]) -> Option<usize>;

    /// Ask for the screen lock so that authentication-bound keys unlock again
    async fn confirm_device_credential(&self);

    /// Draw attention to the device while a confirmation is pending
    fn wink(&self) {}

    /// Ask the management surface whether all credentials may be wiped
    async fn request_reset(&self) -> bool;

    fn handle_special_status(&self, status: SpecialStatus);
}

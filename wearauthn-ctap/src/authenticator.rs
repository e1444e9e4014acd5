//! Authenticator context
//!
//! [`Authenticator`] owns one connection's view of the device: the
//! configuration, the collaborators, the shared persistent stores, the
//! key-agreement key and the GetNextAssertion cursor. Command handlers in
//! [`crate::commands`] drive it step by step.

use crate::callbacks::{KeyStoreError, SecureKeyStore, SpecialStatus, UpResult, UserInteraction};
use crate::credential::{self, Credential, WebAuthnCredential};
use crate::request_info::RequestInfo;
use crate::session::{AssertionCursor, StatusHandle};
use crate::status::{Result, StatusCode};
use crate::store::CredentialStore;
use crate::types::{AttestationType, PublicKeyCredentialDescriptor, Transport};

use wearauthn_crypto::{ecdh::KeyPair, ecdsa};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Largest CTAP message accepted or produced, as on CTAPHID
pub const MAX_MSG_SIZE: usize = 7609;

/// SHA-256 of an RP ID
pub fn rp_id_hash(rp_id: &str) -> [u8; 32] {
    Sha256::digest(rp_id.as_bytes()).into()
}

/// Shared batch attestation key and its certificate
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BatchAttestation {
    private_key: [u8; 32],
    #[zeroize(skip)]
    certificate: Vec<u8>,
}

impl BatchAttestation {
    /// `certificate` is the DER encoding of the batch certificate
    pub fn new(private_key: [u8; 32], certificate: Vec<u8>) -> Self {
        Self {
            private_key,
            certificate,
        }
    }

    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(ecdsa::sign(&self.private_key, data)?)
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }
}

impl fmt::Debug for BatchAttestation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchAttestation")
            .field("certificate_len", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

/// Authenticator configuration
#[derive(Clone)]
pub struct AuthenticatorConfig {
    /// AAGUID for self attestation; WebAuthn requires all zeros
    pub aaguid_self: [u8; 16],

    /// AAGUID for batch attestation, also reported by GetInfo
    pub aaguid_basic: [u8; 16],

    /// AAGUID for keys attested by the platform key store
    pub aaguid_platform: [u8; 16],

    pub batch_attestation: Option<BatchAttestation>,

    /// Authenticates non-resident key handles
    pub key_handle_secret: Zeroizing<[u8; 32]>,

    pub max_msg_size: usize,

    pub max_credential_count_in_list: usize,

    /// Pause between the transaction dialog and the presence prompt
    pub transaction_prompt_delay: Duration,

    /// How long the device-credential prompt runs before the device winks
    pub reauth_wink_delay: Duration,
}

impl AuthenticatorConfig {
    /// Defaults with a random key-handle secret
    pub fn new() -> Self {
        let mut key_handle_secret = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut *key_handle_secret);

        Self {
            aaguid_self: [0u8; 16],
            aaguid_basic: [0u8; 16],
            aaguid_platform: [0u8; 16],
            batch_attestation: None,
            key_handle_secret,
            max_msg_size: MAX_MSG_SIZE,
            max_credential_count_in_list: 5,
            transaction_prompt_delay: Duration::from_millis(500),
            reauth_wink_delay: Duration::from_secs(1),
        }
    }

    pub fn with_aaguid_basic(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid_basic = aaguid;
        self
    }

    pub fn with_aaguid_platform(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid_platform = aaguid;
        self
    }

    pub fn with_batch_attestation(mut self, batch: BatchAttestation) -> Self {
        self.batch_attestation = Some(batch);
        self
    }

    /// Key handles issued under one secret only resolve under the same secret
    pub fn with_key_handle_secret(mut self, secret: [u8; 32]) -> Self {
        self.key_handle_secret = Zeroizing::new(secret);
        self
    }

    /// Set maximum message size
    ///
    /// Values are clamped to the range CTAP allows (1024 to 7609 bytes).
    pub fn with_max_msg_size(mut self, size: usize) -> Self {
        self.max_msg_size = size.clamp(1024, MAX_MSG_SIZE);
        self
    }

    pub fn with_transaction_prompt_delay(mut self, delay: Duration) -> Self {
        self.transaction_prompt_delay = delay;
        self
    }

    pub fn with_reauth_wink_delay(mut self, delay: Duration) -> Self {
        self.reauth_wink_delay = delay;
        self
    }

    pub fn aaguid_for(&self, attestation: AttestationType) -> [u8; 16] {
        match attestation {
            AttestationType::SelfAttestation => self.aaguid_self,
            AttestationType::Basic => self.aaguid_basic,
            AttestationType::Platform => self.aaguid_platform,
        }
    }
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthenticatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatorConfig")
            .field("aaguid_basic", &self.aaguid_basic)
            .field("aaguid_platform", &self.aaguid_platform)
            .field("batch_attestation", &self.batch_attestation)
            .field("max_msg_size", &self.max_msg_size)
            .field("max_credential_count_in_list", &self.max_credential_count_in_list)
            .field("transaction_prompt_delay", &self.transaction_prompt_delay)
            .field("reauth_wink_delay", &self.reauth_wink_delay)
            .finish_non_exhaustive()
    }
}

/// State of one transport connection
pub struct Authenticator<K: SecureKeyStore + ?Sized, U: UserInteraction + ?Sized> {
    config: AuthenticatorConfig,
    transport: Transport,
    key_store: Arc<K>,
    ui: Arc<U>,
    store: Arc<CredentialStore>,
    status: StatusHandle,

    /// Handed out by ClientPIN and used for hmac-secret
    ///
    /// One key per connection: each new `Authenticator` generates its own and
    /// a reset replaces it, so a platform must redo ClientPIN getKeyAgreement
    /// after reconnecting.
    key_agreement: KeyPair,

    cursor: Option<AssertionCursor>,
}

impl<K: SecureKeyStore + ?Sized, U: UserInteraction + ?Sized> Authenticator<K, U> {
    /// Create an authenticator for a connection over `transport`
    ///
    /// # Arguments
    ///
    /// * `config` - Authenticator configuration
    /// * `transport` - Transport the requests arrive on
    /// * `key_store` - Secure key store holding every credential key
    /// * `ui` - Dialogs and notifications
    /// * `store` - Persistent state shared with other connections
    pub fn new(
        config: AuthenticatorConfig,
        transport: Transport,
        key_store: Arc<K>,
        ui: Arc<U>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            config,
            transport,
            key_store,
            ui,
            store,
            status: StatusHandle::new(),
            key_agreement: KeyPair::generate(),
            cursor: None,
        }
    }

    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn key_store(&self) -> &K {
        &self.key_store
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Status observable from other tasks while a request is in flight
    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    pub fn key_agreement(&self) -> &KeyPair {
        &self.key_agreement
    }

    /// The watch can show interactive dialogs for the whole request
    pub fn can_use_display(&self) -> bool {
        self.transport.is_hid()
    }

    pub(crate) fn set_cursor(&mut self, cursor: Option<AssertionCursor>) {
        self.cursor = cursor;
    }

    pub(crate) fn cursor_mut(&mut self) -> Option<&mut AssertionCursor> {
        self.cursor.as_mut()
    }

    pub(crate) fn clear_cursor(&mut self) {
        self.cursor = None;
    }

    /// Prompt the user, reporting `WaitingForUserPresence` meanwhile
    pub async fn confirm_with_user(&self, info: &RequestInfo) -> UpResult {
        let _waiting = self.status.waiting_for_user();
        let result = self.ui.confirm(info).await;
        tracing::debug!(?result, rp_id = %info.rp_id(), "user confirmation");
        result
    }

    /// Pick one of `candidates`; a single candidate is returned without asking
    pub async fn choose_credential<'a>(
        &self,
        candidates: &'a [Credential],
    ) -> Option<&'a Credential> {
        match candidates {
            [] => None,
            [only] => Some(only),
            _ => {
                let _waiting = self.status.waiting_for_user();
                let index = self.ui.choose_credential(candidates).await?;
                candidates.get(index)
            }
        }
    }

    /// Ask for the screen lock, winking if the prompt goes unanswered for a while
    pub async fn confirm_device_credential(&self) {
        let _waiting = self.status.waiting_for_user();
        let mut confirmation = self.ui.confirm_device_credential();
        tokio::select! {
            () = &mut confirmation => return,
            () = tokio::time::sleep(self.config.reauth_wink_delay) => self.ui.wink(),
        }
        confirmation.await;
    }

    /// Whether user verification is configured, ignoring its timeout
    ///
    /// `None` means the device has no verification method.
    pub fn verification_available(&self) -> Option<bool> {
        match self.key_store.verification_state(false) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(error = %err, "failed to query verification state");
                None
            }
        }
    }

    /// Check for a recent screen-lock confirmation, reauthenticating once over HID
    pub async fn verify_user(&self) -> bool {
        if self.key_store.device_locked() {
            return false;
        }
        match self.key_store.verification_state(true) {
            Ok(state) => state == Some(true),
            Err(KeyStoreError::ReauthenticationRequired) => {
                if !self.transport.is_hid() {
                    self.ui
                        .handle_special_status(SpecialStatus::UserNotAuthenticated);
                    return false;
                }
                self.confirm_device_credential().await;
                matches!(self.key_store.verification_state(true), Ok(Some(true)))
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to verify user");
                false
            }
        }
    }

    /// Run a key-store operation, confirming the device credential and
    /// retrying once if the key needs a fresh authentication
    ///
    /// A second stale-authentication failure is `OperationDenied`; any other
    /// key-store failure is `Other`.
    pub async fn with_reauthentication<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = core::result::Result<T, KeyStoreError>>,
    {
        let first = match operation().await {
            Err(KeyStoreError::ReauthenticationRequired) => {
                tracing::debug!("key requires reauthentication, confirming device credential");
                self.confirm_device_credential().await;
                operation().await
            }
            result => result,
        };

        first.map_err(|err| match err {
            KeyStoreError::ReauthenticationRequired => StatusCode::OperationDenied,
            other => {
                tracing::error!(error = %other, "key store operation failed");
                StatusCode::Other
            }
        })
    }

    /// ES256 signature by a credential key over the concatenation of `data`
    pub async fn sign(&self, key_alias: &str, data: &[&[u8]]) -> Result<Vec<u8>> {
        self.with_reauthentication(|| self.key_store.sign(key_alias, data))
            .await
    }

    /// Credential behind an allow- or exclude-list entry, if it is ours and still valid
    pub async fn resolve_credential(
        &self,
        rp_id_hash: &[u8; 32],
        descriptor: &PublicKeyCredentialDescriptor,
    ) -> Option<Credential> {
        if !descriptor.is_public_key() {
            return None;
        }
        let credential = credential::decode_key_handle(
            &self.config.key_handle_secret,
            rp_id_hash,
            &descriptor.id,
        )?;
        if !self.store.counters.contains(credential.key_alias()) {
            return None;
        }
        self.key_store.public_key(credential.key_alias()).await?;
        Some(credential)
    }

    /// The stored resident record for `credential`, or `credential` itself
    pub fn lookup_and_replace_with_resident(&self, credential: Credential) -> Credential {
        let Some(user_id) = self
            .store
            .resident
            .user_id_for_key_handle(credential.rp_id_hash(), credential.key_handle())
        else {
            return credential;
        };
        match self.usable_resident_credential(credential.rp_id_hash(), &user_id) {
            Some(resident) => {
                tracing::debug!("replaced allow list entry with resident credential");
                Credential::WebAuthn(resident)
            }
            None => credential,
        }
    }

    pub fn resident_credential(
        &self,
        rp_id_hash: &[u8; 32],
        user_id: &[u8],
    ) -> Option<WebAuthnCredential> {
        let record = self.store.resident.get(rp_id_hash, user_id)?;
        let credential = WebAuthnCredential::from_record(rp_id_hash, &record);
        if credential.is_none() {
            tracing::warn!("dropping unreadable resident credential record");
        }
        credential
    }

    /// A resident record whose key still has a counter
    fn usable_resident_credential(
        &self,
        rp_id_hash: &[u8; 32],
        user_id: &[u8],
    ) -> Option<WebAuthnCredential> {
        let credential = self.resident_credential(rp_id_hash, user_id)?;
        if !self.store.counters.contains(&credential.key_alias) {
            tracing::warn!("skipping resident credential without counter");
            return None;
        }
        Some(credential)
    }

    /// Resident credentials for an RP, newest first
    pub fn resident_credentials(&self, rp_id_hash: &[u8; 32]) -> Vec<Credential> {
        let mut credentials: Vec<WebAuthnCredential> = self
            .store
            .resident
            .user_ids(rp_id_hash)
            .iter()
            .filter_map(|user_id| self.usable_resident_credential(rp_id_hash, user_id))
            .collect();
        credentials.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        tracing::debug!(count = credentials.len(), "found resident credentials");
        credentials.into_iter().map(Credential::WebAuthn).collect()
    }

    /// Persist a resident credential, sealing its user info if the user was verified
    ///
    /// A previous credential of the same user at the same RP is replaced and
    /// its key deleted.
    pub async fn set_resident_credential(
        &self,
        credential: &WebAuthnCredential,
        user_verified: bool,
    ) -> Result<()> {
        let user_id = credential.user_id.as_deref().ok_or_else(|| {
            tracing::error!("resident credential without user id");
            StatusCode::Other
        })?;

        let key_store: &K = &self.key_store;
        let stored = if user_verified {
            self.with_reauthentication(|| {
                let mut sealed = credential.clone();
                async move {
                    sealed.seal_user_info(key_store).await?;
                    Ok(sealed)
                }
            })
            .await?
        } else {
            credential.clone()
        };
        let record = stored.to_record()?;

        let replaced = self.resident_credential(&credential.rp_id_hash, user_id);
        self.store.resident.put(
            &credential.rp_id_hash,
            user_id,
            &credential.key_handle,
            record,
            replaced.as_ref().map(|old| old.key_handle.as_slice()),
        )?;
        if let Some(old) = replaced
            && old.key_alias != credential.key_alias
        {
            self.delete_credential(&old.key_alias).await;
        }
        tracing::info!("resident credential stored");
        Ok(())
    }

    /// A key for a new credential
    ///
    /// Over NFC, plain non-resident credentials use the pre-generated cached
    /// key. Otherwise a key is generated, with platform attestation while the
    /// device supports it.
    pub async fn get_or_create_fresh_credential(
        &self,
        resident: bool,
        hmac_secret: bool,
        attestation_challenge: &[u8],
    ) -> Result<Option<(String, AttestationType)>> {
        if !self.transport.is_hid()
            && !resident
            && !hmac_secret
            && let Some(alias) = self.store.cache.take()?
        {
            tracing::debug!("using cached credential key");
            return Ok(Some((alias, AttestationType::SelfAttestation)));
        }

        let challenge = self
            .store
            .preferences
            .use_platform_attestation()
            .then_some(attestation_challenge);
        if let Some(generated) = self.key_store.generate(resident, hmac_secret, challenge).await {
            return Ok(Some(generated));
        }
        if challenge.is_none() {
            tracing::error!("key generation failed without attestation");
            return Ok(None);
        }

        tracing::warn!("key generation failed, falling back to self attestation from now on");
        self.store.preferences.set_use_platform_attestation(false)?;
        Ok(self.key_store.generate(resident, hmac_secret, None).await)
    }

    /// Make sure a cached key is ready for the next NFC registration
    pub async fn refresh_cached_credential_if_necessary(&self) -> Result<()> {
        if self.store.cache.peek()?.is_some() {
            return Ok(());
        }
        let Some((alias, _)) = self.key_store.generate(false, false, None).await else {
            tracing::error!("failed to refresh the credential cache");
            return Ok(());
        };
        if !self.store.cache.fill(&alias)? {
            self.key_store.delete(&alias).await;
            return Ok(());
        }
        tracing::info!("refreshed the credential cache");
        Ok(())
    }

    /// Delete a key and its counter
    pub async fn delete_credential(&self, key_alias: &str) {
        self.key_store.delete(key_alias).await;
        if let Err(err) = self.store.counters.delete(key_alias) {
            tracing::error!(error = %err, "failed to delete counter");
        }
    }

    /// Ask the management surface for permission to wipe everything
    pub async fn request_reset(&self) -> bool {
        let _waiting = self.status.waiting_for_user();
        self.ui.request_reset().await
    }

    /// Remove every key and all persistent state, then start over
    pub async fn wipe(&mut self) -> Result<()> {
        for alias in self.store.known_key_aliases()? {
            self.key_store.delete(&alias).await;
        }
        self.store.wipe()?;
        self.key_agreement = KeyPair::generate();
        self.cursor = None;
        tracing::info!("all credentials deleted");
        Ok(())
    }

    pub fn notify(&self, info: &RequestInfo) {
        self.ui.notify(info);
    }

    pub fn handle_special_status(&self, status: SpecialStatus) {
        self.ui.handle_special_status(status);
    }
}

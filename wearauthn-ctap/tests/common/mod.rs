//! Common test utilities for wearauthn-ctap integration tests
//!
//! A software key store on top of p256, a scripted user interface that
//! records every call, and helpers to build requests and read responses.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use wearauthn_crypto::ecdsa;
use wearauthn_crypto::pin_protocol::hmac_sha256;
use wearauthn_ctap::cbor::{self, MapBuilder, MapParser, Value};
use wearauthn_ctap::{
    AttestationType, Authenticator, AuthenticatorConfig, CommandDispatcher, Credential,
    CredentialStore, KeyStoreError, RequestInfo, SecureKeyStore, SpecialStatus, Transport,
    UpResult, UserInteraction,
};

pub const RP_ID: &str = "example.com";

pub mod cmd {
    pub const MAKE_CREDENTIAL: u8 = 0x01;
    pub const GET_ASSERTION: u8 = 0x02;
    pub const GET_INFO: u8 = 0x04;
    pub const CLIENT_PIN: u8 = 0x06;
    pub const RESET: u8 = 0x07;
    pub const GET_NEXT_ASSERTION: u8 = 0x08;
    pub const SELECTION: u8 = 0x0B;
}

/// `RUST_LOG=wearauthn_ctap=debug cargo test` shows the authenticator's logs
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct SoftKey {
    private_key: [u8; 32],
    public_key: Vec<u8>,
    /// Secrets without and with user verification
    hmac_secrets: Option<([u8; 32], [u8; 32])>,
}

/// Key store keeping P-256 keys in memory
#[derive(Default)]
pub struct SoftwareKeyStore {
    keys: Mutex<HashMap<String, SoftKey>>,
    next_alias: AtomicUsize,
    /// Generation with an attestation challenge yields platform attestation
    pub platform_attestation: AtomicBool,
    pub generation_fails: AtomicBool,
    /// `public_key` answers `None` for every key
    pub public_key_fails: AtomicBool,
    /// `None` means no screen lock is configured
    pub verification: Mutex<Option<bool>>,
    /// The last screen-lock confirmation has timed out
    pub auth_expired: AtomicBool,
    /// Auth-bound operations fail with `ReauthenticationRequired` this many times
    pub pending_reauth: AtomicUsize,
    /// Auth-bound operations keep failing even after a confirmation
    pub reauth_never_succeeds: AtomicBool,
    pub locked: AtomicBool,
    pub deleted: Mutex<Vec<String>>,
    pub challenges: Mutex<Vec<Option<Vec<u8>>>>,
}

impl SoftwareKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verification(state: Option<bool>) -> Self {
        let store = Self::default();
        *store.verification.lock().unwrap() = state;
        store
    }

    pub fn key_count(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.keys.lock().unwrap().contains_key(alias)
    }

    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.keys.lock().unwrap().keys().cloned().collect();
        aliases.sort();
        aliases
    }

    pub fn public_key_of(&self, alias: &str) -> Vec<u8> {
        self.keys.lock().unwrap()[alias].public_key.clone()
    }

    /// Expected hmac-secret output for one salt
    pub fn expected_hmac(&self, alias: &str, user_verified: bool, salt: &[u8]) -> [u8; 32] {
        let keys = self.keys.lock().unwrap();
        let (without_uv, with_uv) = keys[alias].hmac_secrets.unwrap();
        let secret = if user_verified { with_uv } else { without_uv };
        hmac_sha256(&secret, &[salt]).unwrap()
    }

    /// What a successful screen-lock confirmation does
    pub fn refresh_authentication(&self) {
        self.auth_expired.store(false, Ordering::SeqCst);
        self.pending_reauth.store(0, Ordering::SeqCst);
    }

    fn check_authentication(&self) -> Result<(), KeyStoreError> {
        if self.reauth_never_succeeds.load(Ordering::SeqCst) {
            return Err(KeyStoreError::ReauthenticationRequired);
        }
        let pending = self.pending_reauth.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_reauth.store(pending - 1, Ordering::SeqCst);
            return Err(KeyStoreError::ReauthenticationRequired);
        }
        Ok(())
    }
}

#[async_trait]
impl SecureKeyStore for SoftwareKeyStore {
    async fn generate(
        &self,
        _resident: bool,
        hmac_secret: bool,
        attestation_challenge: Option<&[u8]>,
    ) -> Option<(String, AttestationType)> {
        self.challenges
            .lock()
            .unwrap()
            .push(attestation_challenge.map(<[u8]>::to_vec));
        if self.generation_fails.load(Ordering::SeqCst) {
            return None;
        }
        let attestation = match attestation_challenge {
            Some(_) if self.platform_attestation.load(Ordering::SeqCst) => {
                AttestationType::Platform
            }
            Some(_) => return None,
            None => AttestationType::SelfAttestation,
        };

        let (private_key, public_key) = ecdsa::generate_keypair();
        let hmac_secrets = hmac_secret.then(|| (rand::random(), rand::random()));
        let alias = format!("key-{}", self.next_alias.fetch_add(1, Ordering::SeqCst));
        self.keys.lock().unwrap().insert(
            alias.clone(),
            SoftKey {
                private_key,
                public_key,
                hmac_secrets,
            },
        );
        Some((alias, attestation))
    }

    async fn sign(&self, key_alias: &str, data: &[&[u8]]) -> Result<Vec<u8>, KeyStoreError> {
        self.check_authentication()?;
        let keys = self.keys.lock().unwrap();
        let key = keys
            .get(key_alias)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_alias.to_string()))?;
        ecdsa::sign(&key.private_key, &data.concat())
            .map_err(|err| KeyStoreError::Backend(err.to_string()))
    }

    async fn public_key(&self, key_alias: &str) -> Option<Vec<u8>> {
        if self.public_key_fails.load(Ordering::SeqCst) {
            return None;
        }
        self.keys
            .lock()
            .unwrap()
            .get(key_alias)
            .map(|key| key.public_key.clone())
    }

    async fn attestation_chain(&self, key_alias: &str) -> Result<Vec<Vec<u8>>, KeyStoreError> {
        Ok(vec![format!("leaf:{key_alias}").into_bytes(), b"root".to_vec()])
    }

    async fn delete(&self, key_alias: &str) {
        self.keys.lock().unwrap().remove(key_alias);
        self.deleted.lock().unwrap().push(key_alias.to_string());
    }

    async fn hmac_secret(
        &self,
        key_alias: &str,
        user_verified: bool,
        salt: &[u8],
    ) -> Result<Option<[u8; 32]>, KeyStoreError> {
        let keys = self.keys.lock().unwrap();
        let key = keys
            .get(key_alias)
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_alias.to_string()))?;
        let Some((without_uv, with_uv)) = key.hmac_secrets else {
            return Ok(None);
        };
        let secret = if user_verified { with_uv } else { without_uv };
        hmac_sha256(&secret, &[salt])
            .map(Some)
            .map_err(|err| KeyStoreError::Backend(err.to_string()))
    }

    async fn seal_user_info(
        &self,
        _key_alias: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, KeyStoreError> {
        self.check_authentication()?;
        Ok(plaintext.iter().map(|b| b ^ 0xA5).collect())
    }

    async fn unseal_user_info(
        &self,
        _key_alias: &str,
        sealed: &[u8],
    ) -> Result<Vec<u8>, KeyStoreError> {
        self.check_authentication()?;
        Ok(sealed.iter().map(|b| b ^ 0xA5).collect())
    }

    fn is_hardware_backed(&self, _key_alias: &str) -> bool {
        true
    }

    fn verification_state(&self, obey_timeout: bool) -> Result<Option<bool>, KeyStoreError> {
        let state = *self.verification.lock().unwrap();
        if obey_timeout && state == Some(true) && self.auth_expired.load(Ordering::SeqCst) {
            return Err(KeyStoreError::ReauthenticationRequired);
        }
        Ok(state)
    }

    fn device_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

/// User interface answering from a script and recording every call
pub struct ScriptedUi {
    key_store: Arc<SoftwareKeyStore>,
    /// Answers to `confirm`, in order; `Accepted` once exhausted
    pub confirm_answers: Mutex<VecDeque<UpResult>>,
    pub confirmations: Mutex<Vec<RequestInfo>>,
    pub notifications: Mutex<Vec<RequestInfo>>,
    /// `None` declines the transaction; otherwise the text to report as shown
    pub transaction_answer: Mutex<Option<String>>,
    pub transactions: Mutex<Vec<(String, String)>>,
    pub chosen_index: Mutex<Option<usize>>,
    pub chooser_calls: AtomicUsize,
    pub reset_answer: AtomicBool,
    pub special_statuses: Mutex<Vec<SpecialStatus>>,
    pub device_credential_delay: Mutex<Duration>,
    pub device_credential_calls: AtomicUsize,
    pub winks: AtomicUsize,
}

impl ScriptedUi {
    pub fn new(key_store: Arc<SoftwareKeyStore>) -> Self {
        Self {
            key_store,
            confirm_answers: Mutex::new(VecDeque::new()),
            confirmations: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            transaction_answer: Mutex::new(None),
            transactions: Mutex::new(Vec::new()),
            chosen_index: Mutex::new(Some(0)),
            chooser_calls: AtomicUsize::new(0),
            reset_answer: AtomicBool::new(true),
            special_statuses: Mutex::new(Vec::new()),
            device_credential_delay: Mutex::new(Duration::ZERO),
            device_credential_calls: AtomicUsize::new(0),
            winks: AtomicUsize::new(0),
        }
    }

    pub fn answer_next(&self, answers: impl IntoIterator<Item = UpResult>) {
        self.confirm_answers.lock().unwrap().extend(answers);
    }

    pub fn confirmations(&self) -> Vec<RequestInfo> {
        self.confirmations.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<RequestInfo> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn special_statuses(&self) -> Vec<SpecialStatus> {
        self.special_statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserInteraction for ScriptedUi {
    fn notify(&self, info: &RequestInfo) {
        self.notifications.lock().unwrap().push(info.clone());
    }

    async fn confirm(&self, info: &RequestInfo) -> UpResult {
        self.confirmations.lock().unwrap().push(info.clone());
        self.confirm_answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(UpResult::Accepted)
    }

    async fn confirm_transaction(&self, rp_id: &str, prompt: &str) -> Option<String> {
        self.transactions
            .lock()
            .unwrap()
            .push((rp_id.to_string(), prompt.to_string()));
        self.transaction_answer.lock().unwrap().clone()
    }

    async fn choose_credential(&self, candidates: &[Credential]) -> Option<usize> {
        self.chooser_calls.fetch_add(1, Ordering::SeqCst);
        let index = (*self.chosen_index.lock().unwrap())?;
        (index < candidates.len()).then_some(index)
    }

    async fn confirm_device_credential(&self) {
        self.device_credential_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.device_credential_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.key_store.refresh_authentication();
    }

    fn wink(&self) {
        self.winks.fetch_add(1, Ordering::SeqCst);
    }

    async fn request_reset(&self) -> bool {
        self.reset_answer.load(Ordering::SeqCst)
    }

    fn handle_special_status(&self, status: SpecialStatus) {
        self.special_statuses.lock().unwrap().push(status);
    }
}

/// One authenticator connection plus handles on its collaborators
pub struct Harness {
    pub dispatcher: CommandDispatcher<SoftwareKeyStore, ScriptedUi>,
    pub key_store: Arc<SoftwareKeyStore>,
    pub ui: Arc<ScriptedUi>,
    pub store: Arc<CredentialStore>,
}

impl Harness {
    pub fn new(transport: Transport) -> Self {
        Self::with_key_store(transport, SoftwareKeyStore::new())
    }

    pub fn with_key_store(transport: Transport, key_store: SoftwareKeyStore) -> Self {
        Self::build(
            transport,
            AuthenticatorConfig::new(),
            Arc::new(key_store),
            Arc::new(CredentialStore::in_memory()),
        )
    }

    pub fn build(
        transport: Transport,
        config: AuthenticatorConfig,
        key_store: Arc<SoftwareKeyStore>,
        store: Arc<CredentialStore>,
    ) -> Self {
        init_tracing();
        let ui = Arc::new(ScriptedUi::new(key_store.clone()));
        let authenticator =
            Authenticator::new(config, transport, key_store.clone(), ui.clone(), store.clone());
        Self {
            dispatcher: CommandDispatcher::new(authenticator),
            key_store,
            ui,
            store,
        }
    }

    /// A second connection sharing key store, persistent state and config
    pub fn connect(&self, transport: Transport) -> Self {
        Self::build(
            transport,
            self.dispatcher.authenticator().config().clone(),
            self.key_store.clone(),
            self.store.clone(),
        )
    }

    pub async fn send(&mut self, command: u8, params: Option<Value>) -> Vec<u8> {
        let mut request = vec![command];
        if let Some(params) = params {
            request.extend_from_slice(&cbor::encode(&params).unwrap());
        }
        self.dispatcher.handle(&request).await
    }
}

pub fn client_data_hash(challenge: &str) -> Vec<u8> {
    Sha256::digest(challenge.as_bytes()).to_vec()
}

pub fn rp_id_hash(rp_id: &str) -> [u8; 32] {
    Sha256::digest(rp_id.as_bytes()).into()
}

pub fn text_map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (cbor::text(k), v))
            .collect(),
    )
}

pub fn options(entries: &[(&str, bool)]) -> Value {
    text_map(entries.iter().map(|(k, v)| (*k, Value::Bool(*v))).collect())
}

pub fn descriptor(id: &[u8]) -> Value {
    text_map(vec![
        ("type", cbor::text("public-key")),
        ("id", cbor::bytes(id.to_vec())),
    ])
}

/// MakeCredential parameters for `RP_ID` with an ES256-only algorithm list
pub struct MakeCredentialRequest {
    builder: MapBuilder,
}

impl MakeCredentialRequest {
    pub fn new(user_id: &[u8], user_name: &str) -> Self {
        Self::for_rp(RP_ID, user_id, user_name)
    }

    pub fn for_rp(rp_id: &str, user_id: &[u8], user_name: &str) -> Self {
        let builder = MapBuilder::new()
            .insert(1, cbor::bytes(client_data_hash("register")))
            .insert(
                2,
                text_map(vec![("id", cbor::text(rp_id)), ("name", cbor::text("Example"))]),
            )
            .insert(
                3,
                text_map(vec![
                    ("id", cbor::bytes(user_id.to_vec())),
                    ("name", cbor::text(user_name)),
                    ("displayName", cbor::text(format!("{user_name} display"))),
                ]),
            )
            .insert(
                4,
                Value::Array(vec![text_map(vec![
                    ("alg", cbor::int(-7)),
                    ("type", cbor::text("public-key")),
                ])]),
            );
        Self { builder }
    }

    pub fn with(mut self, key: i32, value: Value) -> Self {
        self.builder = self.builder.insert(key, value);
        self
    }

    pub fn options(self, entries: &[(&str, bool)]) -> Self {
        self.with(7, options(entries))
    }

    pub fn build(self) -> Value {
        self.builder.build_value()
    }
}

/// GetAssertion parameters for `RP_ID`
pub struct GetAssertionRequest {
    builder: MapBuilder,
}

impl GetAssertionRequest {
    pub fn new() -> Self {
        let builder = MapBuilder::new()
            .insert(1, cbor::text(RP_ID))
            .insert(2, cbor::bytes(client_data_hash("authenticate")));
        Self { builder }
    }

    pub fn allow(self, ids: &[&[u8]]) -> Self {
        let list = ids.iter().map(|id| descriptor(id)).collect();
        self.with(3, Value::Array(list))
    }

    pub fn with(mut self, key: i32, value: Value) -> Self {
        self.builder = self.builder.insert(key, value);
        self
    }

    pub fn options(self, entries: &[(&str, bool)]) -> Self {
        self.with(5, options(entries))
    }

    pub fn build(self) -> Value {
        self.builder.build_value()
    }
}

/// Payload of a successful response
pub fn success(response: &[u8]) -> MapParser {
    assert_eq!(
        response.first(),
        Some(&0x00),
        "expected success, got {response:02x?}"
    );
    MapParser::from_bytes(&response[1..]).unwrap()
}

/// Decoded pieces of an attestation object
pub struct Registration {
    pub fmt: String,
    pub auth_data: Vec<u8>,
    pub att_stmt: Value,
    pub credential_id: Vec<u8>,
    pub public_key: Value,
    pub extensions: Option<Value>,
}

impl Registration {
    pub fn flags(&self) -> u8 {
        self.auth_data[32]
    }

    pub fn sign_count(&self) -> u32 {
        u32::from_be_bytes(self.auth_data[33..37].try_into().unwrap())
    }

    pub fn aaguid(&self) -> &[u8] {
        &self.auth_data[37..53]
    }
}

pub fn parse_registration(response: &[u8]) -> Registration {
    let parser = success(response);
    let fmt = parser.text(1).unwrap().to_string();
    let auth_data = parser.bytes(2).unwrap().to_vec();
    let att_stmt = parser.get(3).unwrap().clone();

    let id_len = u16::from_be_bytes([auth_data[53], auth_data[54]]) as usize;
    let credential_id = auth_data[55..55 + id_len].to_vec();
    let rest = &auth_data[55 + id_len..];

    // COSE key followed by optional extension map
    let mut deserializer_input = rest;
    let public_key: Value = decode_prefix(&mut deserializer_input);
    let extensions =
        (!deserializer_input.is_empty()).then(|| decode_prefix(&mut deserializer_input));

    Registration {
        fmt,
        auth_data,
        att_stmt,
        credential_id,
        public_key,
        extensions,
    }
}

/// Decode one CBOR item from the front of `input` and advance past it
fn decode_prefix(input: &mut &[u8]) -> Value {
    for end in 1..=input.len() {
        if let Ok(value) = cbor::decode::<Value>(&input[..end]) {
            *input = &input[end..];
            return value;
        }
    }
    panic!("no CBOR item in {input:02x?}");
}

/// Decoded pieces of an assertion
pub struct Assertion {
    pub credential_id: Option<Vec<u8>>,
    pub auth_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user: Option<Value>,
    pub number_of_credentials: Option<i64>,
    pub user_selected: Option<bool>,
}

impl Assertion {
    pub fn flags(&self) -> u8 {
        self.auth_data[32]
    }

    pub fn sign_count(&self) -> u32 {
        u32::from_be_bytes(self.auth_data[33..37].try_into().unwrap())
    }

    pub fn extensions(&self) -> Option<Value> {
        (self.auth_data.len() > 37).then(|| cbor::decode(&self.auth_data[37..]).unwrap())
    }

    pub fn user_id(&self) -> Option<Vec<u8>> {
        let user = self.user.as_ref()?;
        let entries = cbor::as_map(user).unwrap();
        cbor::text_map_get(entries, "id").map(|id| cbor::as_bytes(id).unwrap().to_vec())
    }

    pub fn user_field(&self, name: &str) -> Option<String> {
        let entries = cbor::as_map(self.user.as_ref()?).unwrap();
        cbor::text_map_get(entries, name).map(|v| cbor::as_text(v).unwrap().to_string())
    }

    /// Check the signature with the credential's public key
    pub fn verify(&self, public_key: &[u8], client_data_hash: &[u8]) -> bool {
        let signed = [self.auth_data.as_slice(), client_data_hash].concat();
        ecdsa::verify(public_key, &signed, &self.signature).is_ok()
    }
}

pub fn parse_assertion(response: &[u8]) -> Assertion {
    let parser = success(response);
    Assertion {
        credential_id: parser.get_opt(1).map(|descriptor| {
            let entries = cbor::as_map(descriptor).unwrap();
            cbor::as_bytes(cbor::text_map_get(entries, "id").unwrap())
                .unwrap()
                .to_vec()
        }),
        auth_data: parser.bytes(2).unwrap().to_vec(),
        signature: parser.bytes(3).unwrap().to_vec(),
        user: parser.get_opt(4).cloned(),
        number_of_credentials: parser.get_opt(5).map(|v| cbor::as_int(v).unwrap()),
        user_selected: parser.get_opt(6).map(|v| cbor::as_bool(v).unwrap()),
    }
}

/// Register a credential and return its id
pub async fn register(harness: &mut Harness, request: MakeCredentialRequest) -> Vec<u8> {
    let response = harness
        .send(cmd::MAKE_CREDENTIAL, Some(request.build()))
        .await;
    parse_registration(&response).credential_id
}

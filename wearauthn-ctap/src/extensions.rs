//! CTAP2 extensions
//!
//! | Extension | makeCredential | getAssertion |
//! |-----------|----------------|--------------|
//! | hmac-secret | provisions the secret | salted HMAC outputs |
//! | txAuthSimple | ignored | prompt echo |
//! | supportedExtensions | identifier list | ignored |
//! | uvm | factors used | factors used |
//!
//! Identifiers this authenticator does not know, or cannot serve on the
//! current transport, are dropped before parsing. Known identifiers with a
//! malformed input fail the whole request.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#sctn-defined-extensions>

use crate::callbacks::SecureKeyStore;
use crate::cbor::{self, MapParser, Value};
use crate::credential::Credential;
use crate::status::{Result, StatusCode};

use wearauthn_crypto::ecdh::{self, KeyPair};
use wearauthn_crypto::pin_protocol::v1;

/// Extension identifiers
pub mod ext_ids {
    pub const HMAC_SECRET: &str = "hmac-secret";
    pub const SUPPORTED_EXTENSIONS: &str = "supportedExtensions";
    pub const TX_AUTH_SIMPLE: &str = "txAuthSimple";
    pub const UVM: &str = "uvm";
}

const ALL_EXTENSIONS: [&str; 4] = [
    ext_ids::HMAC_SECRET,
    ext_ids::SUPPORTED_EXTENSIONS,
    ext_ids::TX_AUTH_SIMPLE,
    ext_ids::UVM,
];

/// FIDO registry values reported by uvm
pub mod uvm {
    pub const USER_VERIFY_PRESENCE: i64 = 0x01;
    pub const USER_VERIFY_PATTERN: i64 = 0x80;
    pub const KEY_PROTECTION_SOFTWARE: i64 = 0x01;
    pub const KEY_PROTECTION_HARDWARE: i64 = 0x02;
    pub const KEY_PROTECTION_TEE: i64 = 0x04;
    pub const MATCHER_PROTECTION_SOFTWARE: i64 = 0x01;
}

/// Identifiers usable on a transport; txAuthSimple needs the watch display
pub fn supported_identifiers(can_use_display: bool) -> Vec<&'static str> {
    ALL_EXTENSIONS
        .into_iter()
        .filter(|id| can_use_display || *id != ext_ids::TX_AUTH_SIMPLE)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Register,
    Authenticate,
}

/// hmac-secret getAssertion input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmacSecretInput {
    /// Platform key-agreement key as an uncompressed SEC1 point
    pub key_agreement: Vec<u8>,
    pub salt_enc: Vec<u8>,
    pub salt_auth: Vec<u8>,
}

mod hmac_keys {
    pub const KEY_AGREEMENT: i32 = 0x01;
    pub const SALT_ENC: i32 = 0x02;
    pub const SALT_AUTH: i32 = 0x03;
}

impl HmacSecretInput {
    fn from_value(value: &Value) -> Result<Self> {
        let parser = MapParser::from_value(value.clone())?;
        let cose = MapParser::from_value(parser.get(hmac_keys::KEY_AGREEMENT)?.clone())?;
        let key_agreement = ecdh::sec1_from_coordinates(cose.bytes(-2)?, cose.bytes(-3)?)?;

        let salt_enc = parser.bytes(hmac_keys::SALT_ENC)?;
        if salt_enc.len() != 32 && salt_enc.len() != 64 {
            return Err(StatusCode::InvalidLength);
        }
        let salt_auth = parser.bytes(hmac_keys::SALT_AUTH)?;
        if salt_auth.len() != 16 {
            return Err(StatusCode::InvalidLength);
        }

        Ok(Self {
            key_agreement,
            salt_enc: salt_enc.to_vec(),
            salt_auth: salt_auth.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionInput {
    /// `hmac-secret: true` during registration
    HmacSecretRegister,
    HmacSecret(HmacSecretInput),
    TxAuthSimple(String),
    SupportedExtensions,
    Uvm,
}

impl ExtensionInput {
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::HmacSecretRegister | Self::HmacSecret(_) => ext_ids::HMAC_SECRET,
            Self::TxAuthSimple(_) => ext_ids::TX_AUTH_SIMPLE,
            Self::SupportedExtensions => ext_ids::SUPPORTED_EXTENSIONS,
            Self::Uvm => ext_ids::UVM,
        }
    }

    /// `Ok(None)` if the extension does not apply to `action` or was switched off
    fn parse(id: &str, value: &Value, action: Action) -> Result<Option<Self>> {
        let input = match (id, action) {
            (ext_ids::HMAC_SECRET, Action::Register) => {
                cbor::as_bool(value)?.then_some(Self::HmacSecretRegister)
            }
            (ext_ids::HMAC_SECRET, Action::Authenticate) => {
                Some(Self::HmacSecret(HmacSecretInput::from_value(value)?))
            }
            (ext_ids::TX_AUTH_SIMPLE, Action::Authenticate) => {
                Some(Self::TxAuthSimple(cbor::as_text(value)?.to_string()))
            }
            (ext_ids::SUPPORTED_EXTENSIONS, Action::Register) => {
                cbor::as_bool(value)?.then_some(Self::SupportedExtensions)
            }
            (ext_ids::UVM, _) => cbor::as_bool(value)?.then_some(Self::Uvm),
            _ => None,
        };
        Ok(input)
    }
}

/// What the output stage needs to know about the current credential
pub struct OutputContext<'a, K: ?Sized> {
    pub key_store: &'a K,
    pub key_agreement: &'a KeyPair,
    pub credential: &'a Credential,
    pub user_present: bool,
    pub user_verified: bool,
}

/// Extensions requested by one command, in request order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionInputs {
    inputs: Vec<ExtensionInput>,
}

impl ExtensionInputs {
    pub fn parse(
        entries: &[(Value, Value)],
        action: Action,
        can_use_display: bool,
    ) -> Result<Self> {
        let supported = supported_identifiers(can_use_display);
        let mut inputs: Vec<ExtensionInput> = Vec::new();

        for (key, value) in entries {
            let Value::Text(id) = key else {
                continue;
            };
            if !supported.contains(&id.as_str()) {
                tracing::debug!(extension = %id, "ignoring unsupported extension");
                continue;
            }
            if inputs.iter().any(|input| input.identifier() == id) {
                continue;
            }
            if let Some(input) = ExtensionInput::parse(id, value, action)? {
                inputs.push(input);
            }
        }

        Ok(Self { inputs })
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn wants_hmac_secret(&self) -> bool {
        self.inputs.iter().any(|input| {
            matches!(
                input,
                ExtensionInput::HmacSecretRegister | ExtensionInput::HmacSecret(_)
            )
        })
    }

    pub fn tx_auth_simple(&self) -> Option<&str> {
        self.inputs.iter().find_map(|input| match input {
            ExtensionInput::TxAuthSimple(prompt) => Some(prompt.as_str()),
            _ => None,
        })
    }

    /// Replace the requested transaction text with what the user actually saw
    pub fn set_tx_auth_simple_prompt(&mut self, shown: String) {
        for input in &mut self.inputs {
            if let ExtensionInput::TxAuthSimple(prompt) = input {
                *prompt = shown;
                return;
            }
        }
    }

    /// Extension output map for one credential, or `None` if nothing was requested
    pub async fn outputs<K: SecureKeyStore + ?Sized>(
        &self,
        ctx: &OutputContext<'_, K>,
    ) -> Result<Option<Value>> {
        if self.inputs.is_empty() {
            return Ok(None);
        }

        let mut outputs = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let output = match input {
                ExtensionInput::HmacSecretRegister => Value::Bool(true),
                ExtensionInput::HmacSecret(hmac_input) => {
                    cbor::bytes(hmac_secret_output(hmac_input, ctx).await?)
                }
                ExtensionInput::TxAuthSimple(prompt) => cbor::text(prompt.clone()),
                ExtensionInput::SupportedExtensions => {
                    Value::Array(ALL_EXTENSIONS.into_iter().map(cbor::text).collect())
                }
                ExtensionInput::Uvm => uvm_output(ctx),
            };
            outputs.push((input.identifier(), output));
        }

        Ok(Some(cbor::canonical_text_map(outputs)))
    }
}

/// Encrypted HMAC outputs for the decrypted salts
async fn hmac_secret_output<K: SecureKeyStore + ?Sized>(
    input: &HmacSecretInput,
    ctx: &OutputContext<'_, K>,
) -> Result<Vec<u8>> {
    let shared = ctx.key_agreement.shared_secret(&input.key_agreement)?;
    let key = v1::derive_key(&shared);

    if !v1::verify(&key, &input.salt_enc, &input.salt_auth) {
        tracing::debug!("hmac-secret saltAuth mismatch");
        return Err(StatusCode::InvalidParameter);
    }

    let salts = v1::decrypt(&key, &input.salt_enc)?;
    if salts.len() != 32 && salts.len() != 64 {
        return Err(StatusCode::InvalidLength);
    }

    let mut output = Vec::with_capacity(salts.len());
    for salt in salts.chunks(32) {
        let secret = ctx
            .key_store
            .hmac_secret(ctx.credential.key_alias(), ctx.user_verified, salt)
            .await?
            .ok_or(StatusCode::NoCredentials)?;
        output.extend_from_slice(&secret);
    }

    Ok(v1::encrypt(&key, &output)?)
}

fn uvm_output<K: SecureKeyStore + ?Sized>(ctx: &OutputContext<'_, K>) -> Value {
    let key_protection = if ctx.key_store.is_hardware_backed(ctx.credential.key_alias()) {
        uvm::KEY_PROTECTION_HARDWARE | uvm::KEY_PROTECTION_TEE
    } else {
        uvm::KEY_PROTECTION_SOFTWARE
    };
    let entry = |method| {
        Value::Array(vec![
            cbor::int(method),
            cbor::int(key_protection),
            cbor::int(uvm::MATCHER_PROTECTION_SOFTWARE),
        ])
    };

    let mut entries = Vec::new();
    if ctx.user_present {
        entries.push(entry(uvm::USER_VERIFY_PRESENCE));
    }
    if ctx.user_verified {
        entries.push(entry(uvm::USER_VERIFY_PATTERN));
    }
    Value::Array(entries)
}

//! CTAP data types
//!
//! Request-side WebAuthn structures and the small enums shared by commands.

use crate::cbor::{self, MapBuilder, Value};
use crate::status::{Result, StatusCode};

/// Maximum length of a user handle in bytes
pub const MAX_USER_ID_LEN: usize = 64;

/// Display strings are cut to this many characters before storage or display
pub const MAX_DISPLAY_LEN: usize = 64;

pub const PUBLIC_KEY_TYPE: &str = "public-key";

/// COSE algorithm identifiers
pub mod cose_alg {
    /// ECDSA with SHA-256 on P-256
    pub const ES256: i64 = -7;
    /// ECDH-ES + HKDF-256, used to label key-agreement keys
    pub const ECDH_ES_HKDF_256: i64 = -25;
}

/// Truncate a display string to [`MAX_DISPLAY_LEN`] characters
pub fn truncate_display(value: &str) -> String {
    value.chars().take(MAX_DISPLAY_LEN).collect()
}

fn optional_text(entries: &[(Value, Value)], key: &str) -> Result<Option<String>> {
    cbor::text_map_get(entries, key)
        .map(|v| cbor::as_text(v).map(str::to_string))
        .transpose()
}

/// COSE_Key of a P-256 point
pub fn cose_ec2_key(x: &[u8], y: &[u8], alg: i64) -> Value {
    MapBuilder::new()
        .insert(1, cbor::int(2))
        .insert(3, cbor::int(alg))
        .insert(-1, cbor::int(1))
        .insert_bytes(-2, x)
        .insert_bytes(-3, y)
        .build_value()
}

/// [`cose_ec2_key`] from an uncompressed SEC1 point
pub fn cose_key_from_sec1(point: &[u8], alg: i64) -> Option<Value> {
    match point {
        [0x04, coordinates @ ..] if coordinates.len() == 64 => {
            let (x, y) = coordinates.split_at(32);
            Some(cose_ec2_key(x, y, alg))
        }
        _ => None,
    }
}

/// Relying party entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    pub id: String,
    pub name: Option<String>,
}

impl RelyingParty {
    /// `icon`, if present, must be text but is otherwise ignored
    pub fn from_value(value: &Value) -> Result<Self> {
        let entries = cbor::as_map(value)?;
        let id = cbor::text_map_get(entries, "id").ok_or(StatusCode::MissingParameter)?;
        let name = optional_text(entries, "name")?;
        optional_text(entries, "icon")?;

        Ok(Self {
            id: cbor::as_text(id)?.to_string(),
            name: name.as_deref().map(truncate_display),
        })
    }
}

/// User account entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: Option<String>,
}

impl User {
    /// `name` is required here even though CTAP2 marks it optional: the
    /// touch-probe detection keys on it.
    pub fn from_value(value: &Value) -> Result<Self> {
        let entries = cbor::as_map(value)?;
        let id = cbor::as_bytes(
            cbor::text_map_get(entries, "id").ok_or(StatusCode::MissingParameter)?,
        )?;
        if id.len() > MAX_USER_ID_LEN {
            return Err(StatusCode::InvalidLength);
        }
        let name = cbor::as_text(
            cbor::text_map_get(entries, "name").ok_or(StatusCode::MissingParameter)?,
        )?;
        let display_name = optional_text(entries, "displayName")?;
        optional_text(entries, "icon")?;

        Ok(Self {
            id: id.to_vec(),
            name: truncate_display(name),
            display_name: display_name.as_deref().map(truncate_display),
        })
    }
}

/// Entry of an allow or exclude list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCredentialDescriptor {
    pub cred_type: String,
    pub id: Vec<u8>,
}

impl PublicKeyCredentialDescriptor {
    pub fn from_value(value: &Value) -> Result<Self> {
        let entries = cbor::as_map(value)?;
        let cred_type = cbor::as_text(
            cbor::text_map_get(entries, "type").ok_or(StatusCode::MissingParameter)?,
        )?;
        let id = cbor::as_bytes(
            cbor::text_map_get(entries, "id").ok_or(StatusCode::MissingParameter)?,
        )?;

        Ok(Self {
            cred_type: cred_type.to_string(),
            id: id.to_vec(),
        })
    }

    pub fn list_from_value(value: &Value) -> Result<Vec<Self>> {
        cbor::as_array(value)?.iter().map(Self::from_value).collect()
    }

    pub fn is_public_key(&self) -> bool {
        self.cred_type == PUBLIC_KEY_TYPE
    }

    /// Response form `{"id": ..., "type": "public-key"}`
    pub fn to_value(&self) -> Value {
        cbor::canonical_text_map([
            ("id", cbor::bytes(self.id.clone())),
            ("type", cbor::text(self.cred_type.clone())),
        ])
    }
}

/// Entry of `pubKeyCredParams`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCredentialParameters {
    pub cred_type: String,
    pub alg: i64,
}

impl PublicKeyCredentialParameters {
    pub fn list_from_value(value: &Value) -> Result<Vec<Self>> {
        cbor::as_array(value)?
            .iter()
            .map(|item| {
                let entries = cbor::as_map(item)?;
                let cred_type = cbor::as_text(
                    cbor::text_map_get(entries, "type").ok_or(StatusCode::MissingParameter)?,
                )?;
                let alg = cbor::as_int(
                    cbor::text_map_get(entries, "alg").ok_or(StatusCode::MissingParameter)?,
                )?;
                Ok(Self {
                    cred_type: cred_type.to_string(),
                    alg,
                })
            })
            .collect()
    }

    pub fn is_es256(&self) -> bool {
        self.cred_type == PUBLIC_KEY_TYPE && self.alg == cose_alg::ES256
    }
}

/// Trust level of a freshly generated credential's attestation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationType {
    /// Signed by the credential key itself
    SelfAttestation,
    /// Signed by the shared batch key
    Basic,
    /// Chain issued by the platform's secure key store
    Platform,
}

impl AttestationType {
    /// Attestation statement format identifier
    pub fn format(self) -> &'static str {
        match self {
            Self::SelfAttestation | Self::Basic => "packed",
            Self::Platform => "android-key",
        }
    }
}

/// Transport the current request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// USB-HID, where the watch can show interactive UI for the whole request
    Hid,
    Nfc,
}

impl Transport {
    pub fn is_hid(self) -> bool {
        self == Self::Hid
    }
}

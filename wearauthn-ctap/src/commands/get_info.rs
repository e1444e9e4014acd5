//! authenticatorGetInfo command
//!
//! Returns information about the authenticator including:
//! - Supported versions
//! - Extensions usable on the current transport
//! - AAGUID
//! - Options (rk, up, uv, plat)
//! - Message and credential list limits
//! - Supported algorithms
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorGetInfo>

use crate::{
    authenticator::Authenticator,
    callbacks::{SecureKeyStore, UserInteraction},
    cbor::MapBuilder,
    credential::MAX_CREDENTIAL_ID_LEN,
    extensions,
    status::Result,
    types::{PUBLIC_KEY_TYPE, cose_alg},
};

use serde::Serialize;

/// GetInfo response keys
mod keys {
    pub const VERSIONS: i32 = 0x01;
    pub const EXTENSIONS: i32 = 0x02;
    pub const AAGUID: i32 = 0x03;
    pub const OPTIONS: i32 = 0x04;
    pub const MAX_MSG_SIZE: i32 = 0x05;
    pub const MAX_CREDENTIAL_COUNT_IN_LIST: i32 = 0x07;
    pub const MAX_CREDENTIAL_ID_LENGTH: i32 = 0x08;
    pub const TRANSPORTS: i32 = 0x09;
    pub const ALGORITHMS: i32 = 0x0A;
}

const VERSIONS: [&str; 2] = ["FIDO_2_0", "U2F_V2"];
const TRANSPORTS: [&str; 2] = ["nfc", "usb"];

// Fields MUST be in canonical CBOR order (by length, then lexicographically)
#[derive(Serialize)]
struct Options {
    rk: bool,
    up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    uv: Option<bool>,
    plat: bool,
}

#[derive(Serialize)]
struct AlgEntry {
    alg: i64,
    r#type: &'static str,
}

/// Handle authenticatorGetInfo command
///
/// Never prompts. `uv` is only reported when the device has a screen lock,
/// and then reports whether it is currently configured.
pub fn handle<K, U>(auth: &Authenticator<K, U>) -> Result<Vec<u8>>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    let config = auth.config();

    let options = Options {
        rk: true,
        up: true,
        uv: auth.verification_available(),
        plat: false,
    };
    let algorithms = [AlgEntry {
        alg: cose_alg::ES256,
        r#type: PUBLIC_KEY_TYPE,
    }];

    MapBuilder::new()
        .insert_serialized(keys::VERSIONS, &VERSIONS)?
        .insert_serialized(
            keys::EXTENSIONS,
            &extensions::supported_identifiers(auth.can_use_display()),
        )?
        .insert_bytes(keys::AAGUID, &config.aaguid_basic)
        .insert_serialized(keys::OPTIONS, &options)?
        .insert_serialized(keys::MAX_MSG_SIZE, &config.max_msg_size)?
        .insert_serialized(
            keys::MAX_CREDENTIAL_COUNT_IN_LIST,
            &config.max_credential_count_in_list,
        )?
        .insert_serialized(keys::MAX_CREDENTIAL_ID_LENGTH, &MAX_CREDENTIAL_ID_LEN)?
        .insert_serialized(keys::TRANSPORTS, &TRANSPORTS)?
        .insert_serialized(keys::ALGORITHMS, &algorithms)?
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::{self, Value};

    #[test]
    fn test_options_canonical_order() {
        let encoded = cbor::encode(&Options {
            rk: true,
            up: true,
            uv: None,
            plat: false,
        })
        .unwrap();
        let value: Value = cbor::decode(&encoded).unwrap();
        let keys: Vec<&str> = cbor::as_map(&value)
            .unwrap()
            .iter()
            .map(|(k, _)| cbor::as_text(k).unwrap())
            .collect();
        assert_eq!(keys, ["rk", "up", "plat"]);
    }

    #[test]
    fn test_algorithm_entry_encoding() {
        let encoded = cbor::encode(&AlgEntry {
            alg: cose_alg::ES256,
            r#type: PUBLIC_KEY_TYPE,
        })
        .unwrap();
        let value: Value = cbor::decode(&encoded).unwrap();
        let entries = cbor::as_map(&value).unwrap();
        assert_eq!(cbor::as_int(cbor::text_map_get(entries, "alg").unwrap()).unwrap(), -7);
        assert_eq!(
            cbor::as_text(cbor::text_map_get(entries, "type").unwrap()).unwrap(),
            "public-key"
        );
    }
}

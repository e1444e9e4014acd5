//! authenticatorClientPIN command
//!
//! No PIN is ever set or verified. Only getKeyAgreement is answered so that
//! platforms can negotiate the shared secret the hmac-secret extension needs.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorClientPIN>

use crate::{
    authenticator::Authenticator,
    callbacks::{SecureKeyStore, UserInteraction},
    cbor::{MapBuilder, MapParser, Value},
    status::{Result, StatusCode},
    types::{cose_alg, cose_ec2_key},
};

/// ClientPIN request parameter keys
mod req_keys {
    pub const PIN_PROTOCOL: i32 = 0x01;
    pub const SUB_COMMAND: i32 = 0x02;
}

/// ClientPIN response keys
mod resp_keys {
    pub const KEY_AGREEMENT: i32 = 0x01;
}

const PIN_PROTOCOL_V1: i64 = 1;

/// ClientPIN subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PinSubCommand {
    GetRetries = 0x01,
    GetKeyAgreement = 0x02,
    SetPin = 0x03,
    ChangePin = 0x04,
    GetPinToken = 0x05,
}

impl PinSubCommand {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0x01 => Some(Self::GetRetries),
            0x02 => Some(Self::GetKeyAgreement),
            0x03 => Some(Self::SetPin),
            0x04 => Some(Self::ChangePin),
            0x05 => Some(Self::GetPinToken),
            _ => None,
        }
    }
}

/// Handle authenticatorClientPIN command
pub fn handle<K, U>(auth: &Authenticator<K, U>, params: &Value) -> Result<Vec<u8>>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    let parser = MapParser::from_value(params.clone())?;

    if parser.int(req_keys::PIN_PROTOCOL)? != PIN_PROTOCOL_V1 {
        return Err(StatusCode::InvalidParameter);
    }

    let sub_command = PinSubCommand::from_i64(parser.int(req_keys::SUB_COMMAND)?);
    match sub_command {
        Some(PinSubCommand::GetKeyAgreement) => {
            let (x, y) = auth.key_agreement().public_key_cose();
            MapBuilder::new()
                .insert(
                    resp_keys::KEY_AGREEMENT,
                    cose_ec2_key(&x, &y, cose_alg::ECDH_ES_HKDF_256),
                )
                .build()
        }
        other => {
            tracing::debug!(sub_command = ?other, "unsupported ClientPIN subcommand");
            Err(StatusCode::InvalidCommand)
        }
    }
}

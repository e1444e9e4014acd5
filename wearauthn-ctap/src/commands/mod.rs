//! CTAP command handlers
//!
//! One module per command of the CTAP 2.0 command set this authenticator
//! implements. Each handler receives the decoded request map (if the command
//! takes one) and returns the encoded response payload.
//!
//! See FIDO2 spec section 5 for command definitions:
//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticator-api>

pub mod client_pin;
pub mod get_assertion;
pub mod get_info;
pub mod get_next_assertion;
pub mod make_credential;
pub mod reset;
pub mod selection;

use crate::cbor::{self, Value};
use crate::status::Result;

/// authenticatorData flag bits
pub(crate) mod flags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;
}

/// `rpIdHash | flags | signCount | [attestedCredentialData] | [extensions]`
///
/// The attested-data and extension-data flags are derived from the
/// arguments; `flags` only needs to carry UP and UV.
pub(crate) fn authenticator_data(
    rp_id_hash: &[u8; 32],
    flags: u8,
    sign_count: u32,
    attested_credential_data: Option<&[u8]>,
    extension_outputs: Option<&Value>,
) -> Result<Vec<u8>> {
    let mut flags = flags;
    if attested_credential_data.is_some() {
        flags |= flags::ATTESTED_CREDENTIAL_DATA;
    }
    if extension_outputs.is_some() {
        flags |= flags::EXTENSION_DATA;
    }

    let mut data = Vec::with_capacity(37 + attested_credential_data.map_or(0, <[u8]>::len));
    data.extend_from_slice(rp_id_hash);
    data.push(flags);
    data.extend_from_slice(&sign_count.to_be_bytes());
    if let Some(attested) = attested_credential_data {
        data.extend_from_slice(attested);
    }
    if let Some(outputs) = extension_outputs {
        data.extend_from_slice(&cbor::encode(outputs)?);
    }
    Ok(data)
}

/// CTAP command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    MakeCredential = 0x01,
    GetAssertion = 0x02,
    GetInfo = 0x04,
    ClientPin = 0x06,
    Reset = 0x07,
    GetNextAssertion = 0x08,
    Selection = 0x0B,
}

impl CommandCode {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::MakeCredential),
            0x02 => Some(Self::GetAssertion),
            0x04 => Some(Self::GetInfo),
            0x06 => Some(Self::ClientPin),
            0x07 => Some(Self::Reset),
            0x08 => Some(Self::GetNextAssertion),
            0x0B => Some(Self::Selection),
            _ => None,
        }
    }
}

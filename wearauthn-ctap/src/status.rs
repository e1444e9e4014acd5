//! CTAP2 status codes
//!
//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#error-responses>
//!
//! Every failing command produces exactly one of these bytes on the wire.

use wearauthn_crypto::CryptoError;

/// CTAP status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u8)]
pub enum StatusCode {
    #[error("success")]
    Success = 0x00,
    #[error("invalid command")]
    InvalidCommand = 0x01,
    #[error("invalid parameter")]
    InvalidParameter = 0x02,
    #[error("invalid message or item length")]
    InvalidLength = 0x03,
    #[error("message timed out")]
    Timeout = 0x05,
    #[error("unexpected CBOR type")]
    CborUnexpectedType = 0x11,
    #[error("invalid CBOR")]
    InvalidCbor = 0x12,
    #[error("missing parameter")]
    MissingParameter = 0x14,
    #[error("limit exceeded")]
    LimitExceeded = 0x15,
    #[error("unsupported extension")]
    UnsupportedExtension = 0x16,
    #[error("credential excluded")]
    CredentialExcluded = 0x19,
    #[error("processing")]
    Processing = 0x21,
    #[error("invalid credential")]
    InvalidCredential = 0x22,
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm = 0x26,
    #[error("operation denied")]
    OperationDenied = 0x27,
    #[error("key store full")]
    KeyStoreFull = 0x28,
    #[error("unsupported option")]
    UnsupportedOption = 0x2B,
    #[error("invalid option")]
    InvalidOption = 0x2C,
    #[error("keepalive cancelled")]
    KeepaliveCancel = 0x2D,
    #[error("no credentials")]
    NoCredentials = 0x2E,
    #[error("user action timed out")]
    UserActionTimeout = 0x2F,
    #[error("not allowed")]
    NotAllowed = 0x30,
    #[error("PIN invalid")]
    PinInvalid = 0x31,
    #[error("PIN auth invalid")]
    PinAuthInvalid = 0x33,
    #[error("PIN not set")]
    PinNotSet = 0x35,
    #[error("PIN required")]
    PinRequired = 0x36,
    #[error("request too large")]
    RequestTooLarge = 0x39,
    #[error("action timed out")]
    ActionTimeout = 0x3A,
    #[error("user presence required")]
    UpRequired = 0x3B,
    #[error("other error")]
    Other = 0x7F,
}

impl StatusCode {
    const ALL: [StatusCode; 30] = [
        Self::Success,
        Self::InvalidCommand,
        Self::InvalidParameter,
        Self::InvalidLength,
        Self::Timeout,
        Self::CborUnexpectedType,
        Self::InvalidCbor,
        Self::MissingParameter,
        Self::LimitExceeded,
        Self::UnsupportedExtension,
        Self::CredentialExcluded,
        Self::Processing,
        Self::InvalidCredential,
        Self::UnsupportedAlgorithm,
        Self::OperationDenied,
        Self::KeyStoreFull,
        Self::UnsupportedOption,
        Self::InvalidOption,
        Self::KeepaliveCancel,
        Self::NoCredentials,
        Self::UserActionTimeout,
        Self::NotAllowed,
        Self::PinInvalid,
        Self::PinAuthInvalid,
        Self::PinNotSet,
        Self::PinRequired,
        Self::RequestTooLarge,
        Self::ActionTimeout,
        Self::UpRequired,
        Self::Other,
    ];

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Unknown bytes map to [`StatusCode::Other`]
    pub fn from_u8(value: u8) -> Self {
        Self::ALL
            .into_iter()
            .find(|code| code.to_u8() == value)
            .unwrap_or(Self::Other)
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> u8 {
        status.to_u8()
    }
}

impl From<CryptoError> for StatusCode {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidPublicKey
            | CryptoError::InvalidLength { .. }
            | CryptoError::InvalidBlockLength(_) => Self::InvalidParameter,
            CryptoError::InvalidPrivateKey | CryptoError::InvalidSignature => {
                tracing::error!(error = %err, "internal cryptographic failure");
                Self::Other
            }
        }
    }
}

/// Result type for CTAP operations
pub type Result<T> = core::result::Result<T, StatusCode>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_round_trip() {
        for code in StatusCode::ALL {
            assert_eq!(StatusCode::from_u8(code.to_u8()), code);
        }
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(StatusCode::InvalidLength.to_u8(), 0x03);
        assert_eq!(StatusCode::NoCredentials.to_u8(), 0x2E);
        assert_eq!(StatusCode::PinRequired.to_u8(), 0x36);
        assert_eq!(StatusCode::RequestTooLarge.to_u8(), 0x39);
    }

    #[test]
    fn test_unknown_status_code() {
        assert_eq!(StatusCode::from_u8(0xFE), StatusCode::Other);
    }

    #[test]
    fn test_from_crypto_error() {
        let status: StatusCode = CryptoError::InvalidPublicKey.into();
        assert_eq!(status, StatusCode::InvalidParameter);

        let status: StatusCode = CryptoError::InvalidBlockLength(15).into();
        assert_eq!(status, StatusCode::InvalidParameter);

        let status: StatusCode = CryptoError::InvalidSignature.into();
        assert_eq!(status, StatusCode::Other);
    }
}

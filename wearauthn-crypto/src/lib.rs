//! Cryptographic primitives for the wearauthn CTAP2 authenticator
//!
//! - **ECDH**: P-256 key agreement used by `authenticatorClientPIN` and hmac-secret
//! - **ECDSA**: ES256 signatures for batch attestation
//! - **PIN protocol one**: SHA-256 key derivation, AES-256-CBC with a zero IV and
//!   truncated HMAC-SHA-256
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html>

pub mod ecdh;
pub mod ecdsa;
pub mod error;
pub mod pin_protocol;

pub use error::{CryptoError, Result};

//! Error types for cryptographic operations

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Public key is not a valid P-256 point
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Private scalar is zero or out of range
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// Signature did not verify or is malformed
    #[error("Invalid signature")]
    InvalidSignature,

    /// Ciphertext is not a whole number of AES blocks
    #[error("Invalid block length: {0} is not a multiple of 16")]
    InvalidBlockLength(usize),

    /// Input had an unexpected size
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Result type alias for cryptographic operations
pub type Result<T> = core::result::Result<T, CryptoError>;

//! P-256 ECDSA (ES256, COSE algorithm -7)
//!
//! Credential keys never leave the secure key store; this module only signs
//! with the fixed batch attestation key and verifies signatures in tests.

use crate::error::{CryptoError, Result};

use p256::ecdsa::{Signature, SigningKey, VerifyingKey, signature::Signer, signature::Verifier};
use rand::rngs::OsRng;

/// Generate a random ES256 key pair
///
/// Returns the 32-byte private scalar and the 65-byte uncompressed public key.
///
/// ```
/// use wearauthn_crypto::ecdsa;
///
/// let (private_key, public_key) = ecdsa::generate_keypair();
/// assert_eq!(public_key.len(), 65);
/// assert_ne!(private_key, [0u8; 32]);
/// ```
pub fn generate_keypair() -> ([u8; 32], Vec<u8>) {
    let signing_key = SigningKey::random(&mut OsRng);
    let public_key = signing_key
        .verifying_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();
    (signing_key.to_bytes().into(), public_key)
}

/// Sign data with ES256, returning a DER-encoded signature
///
/// ```
/// use wearauthn_crypto::ecdsa;
///
/// let (private_key, public_key) = ecdsa::generate_keypair();
/// let signature = ecdsa::sign(&private_key, b"authData || clientDataHash").unwrap();
/// assert!(ecdsa::verify(&public_key, b"authData || clientDataHash", &signature).is_ok());
/// ```
pub fn sign(private_key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    let signing_key =
        SigningKey::from_bytes(private_key.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
    let signature: Signature = signing_key.sign(data);
    Ok(signature.to_der().to_bytes().to_vec())
}

/// Verify a DER-encoded ES256 signature against an uncompressed SEC1 public key
pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::from_der(signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify(data, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

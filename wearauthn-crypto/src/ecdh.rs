//! P-256 ECDH key agreement
//!
//! The authenticator's key-agreement key is handed to the platform through
//! `authenticatorClientPIN(getKeyAgreement)` and later combined with the
//! platform's key to protect hmac-secret salts.

use crate::error::{CryptoError, Result};

use p256::{PublicKey, SecretKey, elliptic_curve::sec1::ToEncodedPoint};
use rand::rngs::OsRng;

/// Length of an uncompressed SEC1 point (0x04 || x || y)
pub const UNCOMPRESSED_POINT_LEN: usize = 65;

/// P-256 key pair for ECDH key agreement
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    ///
    /// ```
    /// use wearauthn_crypto::ecdh::KeyPair;
    ///
    /// let keypair = KeyPair::generate();
    /// assert_eq!(keypair.public_key_bytes().len(), 65);
    /// ```
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Public key as affine (x, y) coordinates for COSE_Key encoding
    pub fn public_key_cose(&self) -> ([u8; 32], [u8; 32]) {
        let point = self.public.to_encoded_point(false);
        let bytes = point.as_bytes();

        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&bytes[1..33]);
        y.copy_from_slice(&bytes[33..65]);
        (x, y)
    }

    /// Public key in uncompressed SEC1 format
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Compute the shared secret with a peer's uncompressed SEC1 public key
    ///
    /// Returns the x-coordinate of the resulting point, as CTAP2 requires.
    ///
    /// ```
    /// use wearauthn_crypto::ecdh::KeyPair;
    ///
    /// let alice = KeyPair::generate();
    /// let bob = KeyPair::generate();
    ///
    /// let alice_shared = alice.shared_secret(&bob.public_key_bytes()).unwrap();
    /// let bob_shared = bob.shared_secret(&alice.public_key_bytes()).unwrap();
    /// assert_eq!(alice_shared, bob_shared);
    /// ```
    pub fn shared_secret(&self, peer_public_key: &[u8]) -> Result<[u8; 32]> {
        let peer_public = PublicKey::from_sec1_bytes(peer_public_key)
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let shared =
            p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer_public.as_affine());

        let mut secret = [0u8; 32];
        secret.copy_from_slice(shared.raw_secret_bytes());
        Ok(secret)
    }
}

/// Assemble an uncompressed SEC1 point from 32-byte coordinates
pub fn sec1_from_coordinates(x: &[u8], y: &[u8]) -> Result<Vec<u8>> {
    for coordinate in [x, y] {
        if coordinate.len() != 32 {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                actual: coordinate.len(),
            });
        }
    }

    let mut point = Vec::with_capacity(UNCOMPRESSED_POINT_LEN);
    point.push(0x04);
    point.extend_from_slice(x);
    point.extend_from_slice(y);
    Ok(point)
}

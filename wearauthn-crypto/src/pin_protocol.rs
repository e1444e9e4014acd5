//! PIN/UV auth protocol one
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorClientPIN>
//!
//! Only the primitives are provided here. The authenticator never verifies a
//! PIN; it uses the shared secret exclusively for hmac-secret salts.

use crate::error::{CryptoError, Result};

use aes::Aes256;
use cbc::{
    Decryptor, Encryptor,
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding},
};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

const BLOCK_LEN: usize = 16;

/// HMAC-SHA-256 over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidLength {
        expected: 32,
        actual: key.len(),
    })?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Protocol one: SHA-256 key derivation, AES-256-CBC with zero IV, HMAC-SHA-256 truncated to 16 bytes
pub mod v1 {
    use super::*;

    /// Derive the shared key from the ECDH x-coordinate
    ///
    /// ```
    /// use wearauthn_crypto::pin_protocol::v1;
    ///
    /// let key = v1::derive_key(&[0x42u8; 32]);
    /// assert_ne!(key, [0x42u8; 32]);
    /// ```
    pub fn derive_key(shared_secret: &[u8; 32]) -> [u8; 32] {
        Sha256::digest(shared_secret).into()
    }

    /// Encrypt whole blocks with AES-256-CBC under a zero IV, without padding
    ///
    /// ```
    /// use wearauthn_crypto::pin_protocol::v1;
    ///
    /// let key = [0x42u8; 32];
    /// let ciphertext = v1::encrypt(&key, &[7u8; 32]).unwrap();
    /// assert_eq!(ciphertext.len(), 32);
    /// assert_eq!(v1::decrypt(&key, &ciphertext).unwrap(), [7u8; 32]);
    /// ```
    pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        if !plaintext.len().is_multiple_of(BLOCK_LEN) {
            return Err(CryptoError::InvalidBlockLength(plaintext.len()));
        }

        let mut buffer = plaintext.to_vec();
        let cipher = Aes256CbcEnc::new(key.into(), &[0u8; BLOCK_LEN].into());
        cipher
            .encrypt_padded_mut::<NoPadding>(&mut buffer, plaintext.len())
            .map_err(|_| CryptoError::InvalidBlockLength(plaintext.len()))?;
        Ok(buffer)
    }

    /// Decrypt whole blocks with AES-256-CBC under a zero IV, without padding
    pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if !ciphertext.len().is_multiple_of(BLOCK_LEN) {
            return Err(CryptoError::InvalidBlockLength(ciphertext.len()));
        }

        let mut buffer = ciphertext.to_vec();
        let cipher = Aes256CbcDec::new(key.into(), &[0u8; BLOCK_LEN].into());
        cipher
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| CryptoError::InvalidBlockLength(ciphertext.len()))?;
        Ok(buffer)
    }

    /// First 16 bytes of HMAC-SHA-256
    pub fn authenticate(key: &[u8; 32], data: &[u8]) -> Result<[u8; 16]> {
        let full = hmac_sha256(key, &[data])?;
        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        Ok(out)
    }

    /// Constant-time check of a truncated MAC
    ///
    /// ```
    /// use wearauthn_crypto::pin_protocol::v1;
    ///
    /// let key = [0x42u8; 32];
    /// let mac = v1::authenticate(&key, b"saltEnc").unwrap();
    /// assert!(v1::verify(&key, b"saltEnc", &mac));
    /// assert!(!v1::verify(&key, b"tampered", &mac));
    /// ```
    pub fn verify(key: &[u8; 32], data: &[u8], expected: &[u8]) -> bool {
        match authenticate(key, data) {
            Ok(computed) => bool::from(computed[..].ct_eq(expected)),
            Err(_) => false,
        }
    }
}

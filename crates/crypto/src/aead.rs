//! AES-GCM-256 with AAD binding.
//!
//! Ciphertext framing is `iv(12) ∥ ciphertext ∥ tag(16)`. The IV is fresh
//! per encryption; the AAD is authenticated but not encrypted.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};

/// IV length prepended to every ciphertext.
pub const IV_LEN: usize = 12;

/// GCM tag length appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// A 256-bit symmetric key.
///
/// The only way to obtain one is random generation or derivation, so a
/// value of this type is always a valid AES-256 key. `Debug` never prints
/// key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Generate a fresh random key from OS randomness.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key material, enforcing the length.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; 32]> for SymmetricKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl core::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Encrypt `plaintext` under `key`, binding `aad` into the tag.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey, aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Encryption)?;

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `iv ∥ ciphertext ∥ tag` frame produced by [`encrypt`].
///
/// Fails with [`CryptoError::Decryption`] on tag mismatch (including any
/// AAD perturbation) or truncated input. The minimum well-formed frame is
/// 29 bytes: IV, tag, and at least one byte of ciphertext.
pub fn decrypt(data: &[u8], key: &SymmetricKey, aad: &[u8]) -> CryptoResult<Vec<u8>> {
    if data.len() < IV_LEN + TAG_LEN + 1 {
        return Err(CryptoError::Decryption);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let (iv, ciphertext) = data.split_at(IV_LEN);

    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decryption)
}

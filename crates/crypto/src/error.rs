//! Crypto error model.

use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Tag mismatch, truncated ciphertext, or wrong key material.
    /// The causes are not distinguishable; callers must treat them alike.
    #[error("decryption failed")]
    Decryption,

    /// AEAD encryption failed (should not happen with valid inputs).
    #[error("encryption failed")]
    Encryption,

    /// A symmetric key was not exactly 32 bytes.
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// A password-derivation salt was outside the 16..=64 byte range.
    #[error("invalid salt length: {0} (must be 16..=64 bytes)")]
    InvalidSaltLength(usize),

    /// A public or private key failed to parse (SEC1 / PKCS#8).
    #[error("invalid key encoding: {0}")]
    KeyEncoding(String),

    /// An ECDSA signature failed to parse or could not be produced.
    #[error("invalid signature encoding")]
    SignatureEncoding,

    /// A wrapped-key envelope was too short to contain its framing.
    #[error("malformed key envelope")]
    MalformedEnvelope,
}

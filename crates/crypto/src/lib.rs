//! Crypto primitives: AEAD, key derivation, P-256 keypairs, key wrapping.
//!
//! Everything here is a pure function over byte slices plus OS randomness.
//! No storage, no async, no engine types; the keyring and runtime crates
//! decide what gets encrypted under which key.

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keypair;
pub mod wrap;

pub use aead::{decrypt, encrypt, SymmetricKey, IV_LEN, TAG_LEN};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, derive_key_from_password, derive_sub_key, SubKeyScope};
pub use keypair::{
    generate_encryption_keypair, generate_signing_keypair, sign, verify, EncryptionKeypair,
    SigningKeypair,
};
pub use wrap::{unwrap_key, wrap_key};

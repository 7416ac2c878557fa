//! Key derivation: HKDF-SHA256 contexts and PBKDF2 password keys.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::aead::SymmetricKey;
use crate::error::{CryptoError, CryptoResult};

/// Fixed HKDF salt for every derivation in the engine.
const HKDF_SALT: &[u8] = b"mo-local-v1";

const PBKDF2_ITERATIONS: u32 = 600_000;

/// Derive a context-bound key from a root key.
///
/// Deterministic: the same `(root, context)` always yields the same key.
pub fn derive_key(root: &SymmetricKey, context: &str) -> SymmetricKey {
    derive_from_secret(root.as_bytes(), context)
}

/// HKDF over arbitrary input key material (used for ECDH shared secrets).
pub(crate) fn derive_from_secret(ikm: &[u8], context: &str) -> SymmetricKey {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), ikm);
    let mut okm = [0u8; 32];
    // expand only fails for oversized outputs; 32 bytes is always valid.
    hk.expand(context.as_bytes(), &mut okm)
        .expect("HKDF expand to 32 bytes");
    SymmetricKey::from(okm)
}

/// Derive a key from a password with PBKDF2-HMAC-SHA256.
///
/// The salt must be 16–64 bytes; shorter salts defeat the point, longer
/// ones indicate a caller bug.
pub fn derive_key_from_password(password: &[u8], salt: &[u8]) -> CryptoResult<SymmetricKey> {
    if !(16..=64).contains(&salt.len()) {
        return Err(CryptoError::InvalidSaltLength(salt.len()));
    }

    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ITERATIONS, &mut out);
    Ok(SymmetricKey::from(out))
}

/// Scope of a derived sub-key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubKeyScope {
    /// Material that leaves the device (sync payload protection).
    Remote,
    /// Material that stays on the device (at-rest protection).
    Local,
}

impl SubKeyScope {
    fn context(&self) -> &'static str {
        match self {
            SubKeyScope::Remote => "subkey-remote",
            SubKeyScope::Local => "subkey-local",
        }
    }
}

/// Derive the remote/local sub-key of a root key.
pub fn derive_sub_key(root: &SymmetricKey, scope: SubKeyScope) -> SymmetricKey {
    derive_key(root, scope.context())
}

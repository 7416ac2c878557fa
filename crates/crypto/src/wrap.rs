//! Key wrapping for recipient public keys (ECIES-style envelope).
//!
//! Envelope layout: `ephemeral_public(65) ∥ iv(12) ∥ ciphertext ∥ tag(16)`.
//! The AES wrap key is HKDF-derived from the raw ECDH shared secret under
//! the `"ecies-wrap"` context.

use p256::ecdh::{diffie_hellman, EphemeralSecret};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

use crate::aead::{self, SymmetricKey, IV_LEN, TAG_LEN};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::derive_from_secret;
use crate::keypair::{parse_private_key, parse_public_key};

const EPHEMERAL_PUBLIC_LEN: usize = 65;
const WRAP_CONTEXT: &str = "ecies-wrap";

/// Wrap `key_material` for the holder of `recipient_public_sec1`.
pub fn wrap_key(key_material: &[u8], recipient_public_sec1: &[u8]) -> CryptoResult<Vec<u8>> {
    let recipient = parse_public_key(recipient_public_sec1)?;

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = ephemeral.public_key().to_encoded_point(false);

    let shared = ephemeral.diffie_hellman(&recipient);
    let wrap_key = derive_from_secret(shared.raw_secret_bytes().as_slice(), WRAP_CONTEXT);

    let sealed = aead::encrypt(key_material, &wrap_key, &[])?;

    let mut out = Vec::with_capacity(EPHEMERAL_PUBLIC_LEN + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Unwrap an envelope produced by [`wrap_key`] with the recipient's PKCS#8
/// private key.
pub fn unwrap_key(envelope: &[u8], recipient_private_pkcs8: &[u8]) -> CryptoResult<Vec<u8>> {
    if envelope.len() < EPHEMERAL_PUBLIC_LEN + IV_LEN + TAG_LEN + 1 {
        return Err(CryptoError::MalformedEnvelope);
    }

    let (ephemeral_bytes, sealed) = envelope.split_at(EPHEMERAL_PUBLIC_LEN);
    let ephemeral = parse_public_key(ephemeral_bytes)?;
    let secret = parse_private_key(recipient_private_pkcs8)?;

    let shared = diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());
    let wrap_key = derive_from_secret(shared.raw_secret_bytes().as_slice(), WRAP_CONTEXT);

    aead::decrypt(sealed, &wrap_key, &[])
}

/// Convenience: wrap a symmetric key.
pub fn wrap_symmetric(key: &SymmetricKey, recipient_public_sec1: &[u8]) -> CryptoResult<Vec<u8>> {
    wrap_key(key.as_bytes(), recipient_public_sec1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::generate_encryption_keypair;

    #[test]
    fn wrap_unwrap_round_trip() {
        let recipient = generate_encryption_keypair().unwrap();
        let dek = SymmetricKey::generate();

        let envelope = wrap_symmetric(&dek, &recipient.public).unwrap();
        assert_eq!(
            envelope.len(),
            EPHEMERAL_PUBLIC_LEN + IV_LEN + 32 + TAG_LEN
        );

        let unwrapped = unwrap_key(&envelope, &recipient.private).unwrap();
        assert_eq!(unwrapped, dek.to_vec());
    }

    #[test]
    fn unwrap_with_wrong_private_key_fails() {
        let recipient = generate_encryption_keypair().unwrap();
        let interloper = generate_encryption_keypair().unwrap();

        let envelope = wrap_key(b"0123456789abcdef0123456789abcdef", &recipient.public).unwrap();
        assert_eq!(
            unwrap_key(&envelope, &interloper.private).unwrap_err(),
            CryptoError::Decryption
        );
    }

    #[test]
    fn truncated_envelope_is_malformed() {
        let recipient = generate_encryption_keypair().unwrap();
        let envelope = wrap_key(b"key material here", &recipient.public).unwrap();

        assert_eq!(
            unwrap_key(&envelope[..EPHEMERAL_PUBLIC_LEN + IV_LEN], &recipient.private).unwrap_err(),
            CryptoError::MalformedEnvelope
        );
    }

    #[test]
    fn fresh_ephemeral_per_wrap() {
        let recipient = generate_encryption_keypair().unwrap();
        let a = wrap_key(b"same key material bytes", &recipient.public).unwrap();
        let b = wrap_key(b"same key material bytes", &recipient.public).unwrap();
        assert_ne!(a, b);
    }
}

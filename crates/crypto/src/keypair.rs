//! NIST P-256 keypairs: ECDH encryption keys and ECDSA signing keys.
//!
//! Public keys travel as SEC1 uncompressed points (65 bytes); private keys
//! as PKCS#8 DER. Signatures are the 64-byte fixed `r ∥ s` encoding.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;

use crate::error::{CryptoError, CryptoResult};

/// An ECDH keypair for key wrapping.
#[derive(Clone)]
pub struct EncryptionKeypair {
    /// SEC1 uncompressed public point, 65 bytes.
    pub public: Vec<u8>,
    /// PKCS#8 DER private key.
    pub private: Vec<u8>,
}

/// An ECDSA P-256 keypair.
#[derive(Clone)]
pub struct SigningKeypair {
    /// SEC1 uncompressed public point, 65 bytes.
    pub public: Vec<u8>,
    /// PKCS#8 DER private key.
    pub private: Vec<u8>,
}

/// Generate a P-256 ECDH keypair.
pub fn generate_encryption_keypair() -> CryptoResult<EncryptionKeypair> {
    let secret = SecretKey::random(&mut OsRng);
    let public = secret.public_key();

    Ok(EncryptionKeypair {
        public: public.to_encoded_point(false).as_bytes().to_vec(),
        private: secret
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
            .as_bytes()
            .to_vec(),
    })
}

/// Generate a P-256 ECDSA keypair.
pub fn generate_signing_keypair() -> CryptoResult<SigningKeypair> {
    let signing = SigningKey::random(&mut OsRng);
    let verifying = signing.verifying_key();

    Ok(SigningKeypair {
        public: verifying.to_encoded_point(false).as_bytes().to_vec(),
        private: signing
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
            .as_bytes()
            .to_vec(),
    })
}

/// Sign `data` with a PKCS#8 private key; SHA-256 digest, 64-byte signature.
pub fn sign(data: &[u8], private_pkcs8: &[u8]) -> CryptoResult<Vec<u8>> {
    let key = SigningKey::from_pkcs8_der(private_pkcs8)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    let signature: Signature = key.sign(data);
    Ok(signature.to_vec())
}

/// Verify a 64-byte signature against a SEC1 public key.
///
/// Returns `Ok(false)` on a well-formed but wrong signature; malformed key
/// or signature encodings are errors.
pub fn verify(data: &[u8], signature: &[u8], public_sec1: &[u8]) -> CryptoResult<bool> {
    let key = VerifyingKey::from_sec1_bytes(public_sec1)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    let signature =
        Signature::from_slice(signature).map_err(|_| CryptoError::SignatureEncoding)?;

    Ok(key.verify(data, &signature).is_ok())
}

pub(crate) fn parse_public_key(sec1: &[u8]) -> CryptoResult<PublicKey> {
    PublicKey::from_sec1_bytes(sec1).map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

pub(crate) fn parse_private_key(pkcs8: &[u8]) -> CryptoResult<SecretKey> {
    SecretKey::from_pkcs8_der(pkcs8).map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

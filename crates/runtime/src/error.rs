//! Runtime error model.
//!
//! The runtime mostly routes errors from the layers below; the decision of
//! which ones halt a batch, skip an event, or defer a tick lives in the
//! processing loops, not here.

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Keyring(#[from] mo_keyring::KeyringError),

    #[error(transparent)]
    Store(#[from] mo_store::StoreError),

    #[error(transparent)]
    Envelope(#[from] mo_events::EnvelopeError),

    #[error(transparent)]
    Crypto(#[from] mo_crypto::CryptoError),

    #[error(transparent)]
    Publish(#[from] mo_events::HandlerError),

    /// An artifact or snapshot body failed to (de)serialize.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl RuntimeError {
    /// Whether this is the master-key deferral signal: return without
    /// advancing, retry next tick.
    pub fn is_deferral(&self) -> bool {
        matches!(
            self,
            RuntimeError::Keyring(mo_keyring::KeyringError::MasterKeyNotSet)
        )
    }

    /// Whether this is a per-event missing key (skip and advance).
    pub fn is_missing_key(&self) -> bool {
        matches!(
            self,
            RuntimeError::Keyring(mo_keyring::KeyringError::MissingKey { .. })
        )
    }
}

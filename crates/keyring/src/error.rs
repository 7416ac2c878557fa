//! Keyring error model.

use mo_core::AggregateId;
use thiserror::Error;

pub type KeyringResult<T> = Result<T, KeyringError>;

#[derive(Debug, Error)]
pub enum KeyringError {
    /// The master key has not been set. This is a deferral signal, not a
    /// failure: callers return without advancing cursors and retry on the
    /// next tick.
    #[error("master key not set")]
    MasterKeyNotSet,

    /// No DEK is resolvable for the aggregate at the requested epoch.
    #[error("missing key for {aggregate_id} at epoch {epoch}")]
    MissingKey {
        aggregate_id: AggregateId,
        epoch: u32,
    },

    /// A keyring update's embedded aggregate id does not match the
    /// aggregate it arrived on. Hard integrity failure.
    #[error("keyring aggregate mismatch: expected {expected}, found {found}")]
    AggregateMismatch {
        expected: AggregateId,
        found: AggregateId,
    },

    /// An operation that requires an existing keyring found none.
    #[error("no keyring for {0}")]
    KeyringNotFound(AggregateId),

    #[error(transparent)]
    Crypto(#[from] mo_crypto::CryptoError),

    /// Keyring state failed to (de)serialize.
    #[error("keyring serialization failed: {0}")]
    Serialization(String),

    /// Key store persistence failed.
    #[error("keyring persistence failed: {0}")]
    Persistence(String),
}

impl KeyringError {
    pub(crate) fn persistence(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

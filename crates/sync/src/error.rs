//! Sync hook errors.

use mo_core::AggregateId;
use thiserror::Error;
use uuid::Uuid;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The pulled record JSON did not parse into the expected shape.
    #[error("malformed remote record: {0}")]
    MalformedRecord(String),

    /// The decrypted envelope's event id does not match the record's.
    /// Integrity failure; the record is dropped.
    #[error("event id mismatch: record says {expected}, envelope says {found}")]
    EventIdMismatch { expected: Uuid, found: Uuid },

    /// Local materialization did not converge in time.
    #[error("timed out waiting for {aggregate_id} to reach version {version}")]
    Timeout {
        aggregate_id: AggregateId,
        version: u64,
    },

    #[error(transparent)]
    Keyring(#[from] mo_keyring::KeyringError),

    #[error(transparent)]
    Store(#[from] mo_store::StoreError),

    #[error(transparent)]
    Envelope(#[from] mo_events::EnvelopeError),

    #[error(transparent)]
    Crypto(#[from] mo_crypto::CryptoError),
}

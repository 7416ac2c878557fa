//! Persisted event shapes.
//!
//! `EventToAppend` is what the command layer hands the appender (ciphertext
//! with a declared version, not yet assigned a commit sequence).
//! `EventRecord` is a stored row. The split mirrors the uncommitted/stored
//! distinction of the append path: the store assigns `commit_sequence`, the
//! sync engine later assigns `global_sequence`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{AggregateId, AggregateType};

/// An event ready to be appended (ciphertext in, no commit sequence yet).
///
/// `payload_encrypted` must already be bound by AAD to
/// `(aggregate_type, aggregate_id, version)`; the store never re-encrypts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventToAppend {
    pub id: Uuid,
    pub event_type: String,
    pub payload_encrypted: Vec<u8>,
    /// Keyring state ciphertext carried in-band for other devices, present
    /// on the first event of an aggregate and after epoch rotation.
    pub keyring_update: Option<Vec<u8>>,
    /// Declared per-aggregate version; the appender rejects the batch when
    /// it does not extend the stream contiguously.
    pub version: u64,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub causation_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Keyring epoch the payload was encrypted under. Absent means 0.
    pub epoch: Option<u32>,
}

/// A stored event row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub payload_encrypted: Vec<u8>,
    pub keyring_update: Option<Vec<u8>>,
    pub version: u64,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub causation_id: Option<String>,
    pub correlation_id: Option<String>,
    pub epoch: Option<u32>,
    /// Local append order, strictly monotonic across all rows.
    pub commit_sequence: i64,
    /// Server-assigned order; `None` while the row is local-only.
    pub global_sequence: Option<i64>,
}

impl EventRecord {
    /// Epoch to resolve keys under; absence is epoch 0.
    pub fn effective_epoch(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// Whether the row has been linearized by the sync engine.
    ///
    /// Mapped rows are immutable; only pending rows may have their version
    /// rewritten.
    pub fn is_pending(&self) -> bool {
        self.global_sequence.is_none()
    }
}

//! The projection contract.

use async_trait::async_trait;

use mo_core::{AggregateType, EffectiveCursor, EventRecord, ProjectionOrdering};
use mo_crypto::SymmetricKey;
use mo_events::CommittedEvent;

use crate::error::RuntimeResult;

/// Result of applying one event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Applied {
    pub changed: bool,
}

/// Outcome of loading persisted state at startup.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Bootstrap {
    /// Persisted artifacts loaded; resume from the stored cursor.
    Ready,
    /// No usable artifacts (missing or failed authentication): drop state
    /// and replay from cursor zero.
    NeedsRebuild,
}

/// A named consumer of the event log.
///
/// Implementations own their in-memory state and their persisted
/// artifacts; the runtime owns the cursor, the phase, and the decision of
/// when to call what. At most one call is in flight per projection at any
/// time (single-writer).
#[async_trait]
pub trait Projection: Send + Sync {
    /// Stable identifier; names the `projection_meta` row and artifact
    /// scope.
    fn projection_id(&self) -> &str;

    /// Which order this projection consumes the log in.
    fn ordering(&self) -> ProjectionOrdering;

    /// Which aggregate stream it consumes.
    fn aggregate_type(&self) -> AggregateType;

    /// Rebuild in-memory state from persisted artifacts.
    async fn bootstrap(&mut self) -> RuntimeResult<Bootstrap>;

    /// Apply one decrypted event.
    ///
    /// `record` is the stored row (ciphertext and identity), `decoded` the
    /// decrypted envelope content, `dek` the key the payload was encrypted
    /// under (for artifacts that re-encrypt per aggregate).
    async fn apply_event(
        &mut self,
        record: &EventRecord,
        decoded: &CommittedEvent,
        dek: &SymmetricKey,
    ) -> RuntimeResult<Applied>;

    /// Persist artifacts bound to the new cursor. Called once per batch,
    /// after every event in the batch was applied.
    /// `last_commit_sequence` is the highest commit sequence consumed.
    async fn persist(
        &mut self,
        cursor: EffectiveCursor,
        last_commit_sequence: i64,
    ) -> RuntimeResult<()>;

    /// Drop in-memory state and every persisted artifact.
    async fn reset(&mut self) -> RuntimeResult<()>;
}

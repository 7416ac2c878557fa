//! Pending version rewriter.
//!
//! When the server anchors a remote event at a version that pending local
//! events already occupy, those pending rows shift up by one. Each shifted
//! payload is re-encrypted so its AAD matches the new version; the
//! aggregate's snapshot is invalidated in the same transaction. This is
//! the only mutator of an existing row's version in the engine.

use tracing::{debug, instrument};

use mo_core::{binding, AggregateId, AggregateType};
use mo_keyring::KeyringManager;
use mo_store::{SqliteEventStore, VersionShift};

use crate::error::SyncResult;

/// What a rewrite did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub shifted_count: usize,
    pub old_max_version: u64,
    pub new_max_version: u64,
}

#[derive(Debug, Clone)]
pub struct PendingVersionRewriter {
    store: SqliteEventStore,
    keyring: KeyringManager,
}

impl PendingVersionRewriter {
    pub fn new(store: SqliteEventStore, keyring: KeyringManager) -> Self {
        Self { store, keyring }
    }

    /// Shift pending rows at `from_version` and above up by one.
    ///
    /// No-op unless a pending row actually occupies `from_version`; that
    /// check is what makes re-applying the same rewrite shift zero rows.
    /// Rows are re-encrypted highest-version-first and committed in a
    /// single transaction together with the snapshot invalidation.
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id, from_version), err)]
    pub async fn rewrite_pending_versions(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &AggregateId,
        from_version: u64,
    ) -> SyncResult<RewriteOutcome> {
        let old_max_version = self.store.max_version(aggregate_type, aggregate_id).await?;

        let pending = self
            .store
            .pending_events_from(aggregate_type, aggregate_id, from_version)
            .await?;

        // Only an actual occupant of `from_version` constitutes a
        // conflict; anything else means the rewrite already happened.
        if !pending.iter().any(|row| row.version == from_version) {
            debug!("no pending row at from_version, nothing to shift");
            return Ok(RewriteOutcome {
                shifted_count: 0,
                old_max_version,
                new_max_version: old_max_version,
            });
        }

        let mut shifts = Vec::with_capacity(pending.len());
        for row in &pending {
            let dek = self.keyring.resolve_key_for_event(row).await?;

            let old_aad = binding::event_aad(aggregate_type, aggregate_id, row.version);
            let plain = mo_crypto::decrypt(&row.payload_encrypted, &dek, &old_aad)?;

            let new_version = row.version + 1;
            let new_aad = binding::event_aad(aggregate_type, aggregate_id, new_version);
            shifts.push(VersionShift {
                event_id: row.id,
                old_version: row.version,
                new_version,
                new_payload: mo_crypto::encrypt(&plain, &dek, &new_aad)?,
            });
        }

        // Highest version first (the pending query orders DESC), so the
        // unique constraint never collides mid-transaction.
        self.store.apply_version_shift(aggregate_id, shifts).await?;

        let new_max_version = self.store.max_version(aggregate_type, aggregate_id).await?;
        debug!(shifted = pending.len(), old_max_version, new_max_version, "shifted pending versions");

        Ok(RewriteOutcome {
            shifted_count: pending.len(),
            old_max_version,
            new_max_version,
        })
    }
}

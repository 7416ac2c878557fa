//! Encrypted snapshot load/save.
//!
//! Snapshots are encrypted under the aggregate's DEK and AAD-bound to
//! `{aggregate_id}:snapshot:{version}`. A snapshot that fails to decrypt
//! is deleted and the caller falls back to event replay.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use mo_core::{binding, AggregateId, AggregateType, EffectiveCursor};
use mo_crypto::SymmetricKey;
use mo_store::{SnapshotRecord, SnapshotStore};

use crate::error::{RuntimeError, RuntimeResult};

#[derive(Debug, Clone)]
pub struct SnapshotManager {
    snapshots: SnapshotStore,
}

/// A decrypted snapshot with the cursor it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSnapshot<T> {
    pub state: T,
    pub version: u64,
    pub cursor: EffectiveCursor,
}

impl SnapshotManager {
    pub fn new(snapshots: SnapshotStore) -> Self {
        Self { snapshots }
    }

    /// Load and decrypt an aggregate's snapshot.
    ///
    /// Returns `None` when no snapshot exists, and also when the stored
    /// one is corrupt: a failed tag check deletes the row so the aggregate
    /// rebuilds from events instead of failing forever.
    pub async fn load<T: DeserializeOwned>(
        &self,
        aggregate_id: &AggregateId,
        dek: &SymmetricKey,
    ) -> RuntimeResult<Option<LoadedSnapshot<T>>> {
        let Some(record) = self.snapshots.get(aggregate_id).await? else {
            return Ok(None);
        };

        let aad = binding::snapshot_aad(aggregate_id, record.snapshot_version);
        let plain = match mo_crypto::decrypt(&record.snapshot_encrypted, dek, &aad) {
            Ok(plain) => plain,
            Err(mo_crypto::CryptoError::Decryption) => {
                warn!(%aggregate_id, version = record.snapshot_version,
                    "snapshot failed authentication, dropping it");
                self.snapshots.delete(aggregate_id).await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let state = serde_json::from_slice(&plain)
            .map_err(|e| RuntimeError::Serialization(e.to_string()))?;

        Ok(Some(LoadedSnapshot {
            state,
            version: record.snapshot_version,
            cursor: record.cursor,
        }))
    }

    /// Encrypt and persist an aggregate's state at a version.
    pub async fn save<T: Serialize>(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &AggregateId,
        version: u64,
        state: &T,
        dek: &SymmetricKey,
        cursor: EffectiveCursor,
    ) -> RuntimeResult<()> {
        let plain = serde_json::to_vec(state)
            .map_err(|e| RuntimeError::Serialization(e.to_string()))?;
        let aad = binding::snapshot_aad(aggregate_id, version);
        let sealed = mo_crypto::encrypt(&plain, dek, &aad)?;

        self.snapshots
            .upsert(&SnapshotRecord {
                aggregate_type,
                aggregate_id: aggregate_id.clone(),
                snapshot_version: version,
                snapshot_encrypted: sealed,
                cursor,
                written_at: Utc::now(),
            })
            .await?;

        Ok(())
    }

    pub async fn delete(&self, aggregate_id: &AggregateId) -> RuntimeResult<()> {
        self.snapshots.delete(aggregate_id).await?;
        Ok(())
    }

    pub async fn delete_for_type(&self, aggregate_type: AggregateType) -> RuntimeResult<()> {
        self.snapshots.delete_for_type(aggregate_type).await?;
        Ok(())
    }
}

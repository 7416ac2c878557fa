//! Encrypted aggregate snapshots.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use mo_core::{AggregateId, AggregateType, EffectiveCursor};

use crate::error::{map_sqlx_error, StoreError, StoreResult};

/// Materialized state of one aggregate at a version, ciphertext opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub snapshot_version: u64,
    pub snapshot_encrypted: Vec<u8>,
    pub cursor: EffectiveCursor,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, snapshot: &SnapshotRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (
                aggregate_type,
                aggregate_id,
                snapshot_version,
                snapshot_encrypted,
                last_global_seq,
                last_pending_commit_seq,
                written_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (aggregate_id)
            DO UPDATE SET
                aggregate_type = excluded.aggregate_type,
                snapshot_version = excluded.snapshot_version,
                snapshot_encrypted = excluded.snapshot_encrypted,
                last_global_seq = excluded.last_global_seq,
                last_pending_commit_seq = excluded.last_pending_commit_seq,
                written_at = excluded.written_at
            "#,
        )
        .bind(snapshot.aggregate_type.as_str())
        .bind(snapshot.aggregate_id.as_str())
        .bind(snapshot.snapshot_version as i64)
        .bind(&snapshot.snapshot_encrypted)
        .bind(snapshot.cursor.global_sequence)
        .bind(snapshot.cursor.pending_commit_sequence)
        .bind(snapshot.written_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("snapshot.upsert", e))?;

        Ok(())
    }

    pub async fn get(&self, aggregate_id: &AggregateId) -> StoreResult<Option<SnapshotRecord>> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_type,
                   aggregate_id,
                   snapshot_version,
                   snapshot_encrypted,
                   last_global_seq,
                   last_pending_commit_seq,
                   written_at
            FROM snapshots
            WHERE aggregate_id = ?1
            "#,
        )
        .bind(aggregate_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("snapshot.get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let corrupt = |msg: String| StoreError::CorruptRow(msg);

        let type_str: String = row
            .try_get("aggregate_type")
            .map_err(|e| corrupt(format!("aggregate_type: {e}")))?;
        let id: String = row
            .try_get("aggregate_id")
            .map_err(|e| corrupt(format!("aggregate_id: {e}")))?;
        let version: i64 = row
            .try_get("snapshot_version")
            .map_err(|e| corrupt(format!("snapshot_version: {e}")))?;
        let written_ms: i64 = row
            .try_get("written_at")
            .map_err(|e| corrupt(format!("written_at: {e}")))?;

        Ok(Some(SnapshotRecord {
            aggregate_type: type_str
                .parse()
                .map_err(|e| corrupt(format!("aggregate_type: {e}")))?,
            aggregate_id: AggregateId::new(id),
            snapshot_version: version as u64,
            snapshot_encrypted: row
                .try_get("snapshot_encrypted")
                .map_err(|e| corrupt(format!("snapshot_encrypted: {e}")))?,
            cursor: EffectiveCursor::new(
                row.try_get("last_global_seq")
                    .map_err(|e| corrupt(format!("last_global_seq: {e}")))?,
                row.try_get("last_pending_commit_seq")
                    .map_err(|e| corrupt(format!("last_pending_commit_seq: {e}")))?,
            ),
            written_at: Utc
                .timestamp_millis_opt(written_ms)
                .single()
                .ok_or_else(|| corrupt(format!("written_at out of range: {written_ms}")))?,
        }))
    }

    /// Drop one aggregate's snapshot (invalidation after rewrite or a
    /// corrupt load).
    pub async fn delete(&self, aggregate_id: &AggregateId) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM snapshots WHERE aggregate_id = ?1"#)
            .bind(aggregate_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("snapshot.delete", e))?;
        Ok(())
    }

    /// Drop all snapshots of one aggregate type (projection rebuild).
    pub async fn delete_for_type(&self, aggregate_type: AggregateType) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM snapshots WHERE aggregate_type = ?1"#)
            .bind(aggregate_type.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("snapshot.delete_for_type", e))?;
        Ok(())
    }
}

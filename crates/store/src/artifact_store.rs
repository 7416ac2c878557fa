//! Projection cache and search-index artifacts.
//!
//! Both tables hold opaque ciphertext keyed by `(owner_id, scope_key)`
//! plus the cursor the artifact was written at; the runtime binds that
//! cursor into the AAD, so a stale artifact cannot be passed off as fresh.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use mo_core::{EffectiveCursor, ProjectionOrdering};

use crate::error::{map_sqlx_error, StoreError, StoreResult};

/// An encrypted projection cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheArtifactRecord {
    pub projection_id: String,
    pub scope_key: String,
    pub cache_version: u64,
    pub cache_encrypted: Vec<u8>,
    pub ordering: ProjectionOrdering,
    pub cursor: EffectiveCursor,
    pub last_commit_sequence: i64,
    pub written_at: DateTime<Utc>,
}

/// An encrypted search-index artifact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexArtifactRecord {
    pub index_id: String,
    pub scope_key: String,
    pub artifact_version: u64,
    pub artifact_encrypted: Vec<u8>,
    pub cursor: EffectiveCursor,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProjectionCacheStore {
    pool: SqlitePool,
}

impl ProjectionCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, artifact: &CacheArtifactRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projection_cache (
                projection_id,
                scope_key,
                cache_version,
                cache_encrypted,
                ordering,
                last_global_seq,
                last_pending_commit_seq,
                last_commit_sequence,
                written_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (projection_id, scope_key)
            DO UPDATE SET
                cache_version = excluded.cache_version,
                cache_encrypted = excluded.cache_encrypted,
                ordering = excluded.ordering,
                last_global_seq = excluded.last_global_seq,
                last_pending_commit_seq = excluded.last_pending_commit_seq,
                last_commit_sequence = excluded.last_commit_sequence,
                written_at = excluded.written_at
            "#,
        )
        .bind(&artifact.projection_id)
        .bind(&artifact.scope_key)
        .bind(artifact.cache_version as i64)
        .bind(&artifact.cache_encrypted)
        .bind(artifact.ordering.as_str())
        .bind(artifact.cursor.global_sequence)
        .bind(artifact.cursor.pending_commit_sequence)
        .bind(artifact.last_commit_sequence)
        .bind(artifact.written_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("projection_cache.upsert", e))?;

        Ok(())
    }

    pub async fn get(
        &self,
        projection_id: &str,
        scope_key: &str,
    ) -> StoreResult<Option<CacheArtifactRecord>> {
        let row = sqlx::query(
            r#"
            SELECT projection_id,
                   scope_key,
                   cache_version,
                   cache_encrypted,
                   ordering,
                   last_global_seq,
                   last_pending_commit_seq,
                   last_commit_sequence,
                   written_at
            FROM projection_cache
            WHERE projection_id = ?1 AND scope_key = ?2
            "#,
        )
        .bind(projection_id)
        .bind(scope_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("projection_cache.get", e))?;

        row.map(|r| cache_row_to_record(&r)).transpose()
    }

    /// Drop every cache row of a projection (rebuild).
    pub async fn delete_for_projection(&self, projection_id: &str) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM projection_cache WHERE projection_id = ?1"#)
            .bind(projection_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("projection_cache.delete_for_projection", e))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IndexArtifactStore {
    pool: SqlitePool,
}

impl IndexArtifactStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, artifact: &IndexArtifactRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO index_artifacts (
                index_id,
                scope_key,
                artifact_version,
                artifact_encrypted,
                last_global_seq,
                last_pending_commit_seq,
                written_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (index_id, scope_key)
            DO UPDATE SET
                artifact_version = excluded.artifact_version,
                artifact_encrypted = excluded.artifact_encrypted,
                last_global_seq = excluded.last_global_seq,
                last_pending_commit_seq = excluded.last_pending_commit_seq,
                written_at = excluded.written_at
            "#,
        )
        .bind(&artifact.index_id)
        .bind(&artifact.scope_key)
        .bind(artifact.artifact_version as i64)
        .bind(&artifact.artifact_encrypted)
        .bind(artifact.cursor.global_sequence)
        .bind(artifact.cursor.pending_commit_sequence)
        .bind(artifact.written_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("index_artifacts.upsert", e))?;

        Ok(())
    }

    pub async fn get(
        &self,
        index_id: &str,
        scope_key: &str,
    ) -> StoreResult<Option<IndexArtifactRecord>> {
        let row = sqlx::query(
            r#"
            SELECT index_id,
                   scope_key,
                   artifact_version,
                   artifact_encrypted,
                   last_global_seq,
                   last_pending_commit_seq,
                   written_at
            FROM index_artifacts
            WHERE index_id = ?1 AND scope_key = ?2
            "#,
        )
        .bind(index_id)
        .bind(scope_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("index_artifacts.get", e))?;

        row.map(|r| index_row_to_record(&r)).transpose()
    }

    pub async fn delete_for_index(&self, index_id: &str) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM index_artifacts WHERE index_id = ?1"#)
            .bind(index_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("index_artifacts.delete_for_index", e))?;
        Ok(())
    }
}

fn cache_row_to_record(row: &SqliteRow) -> StoreResult<CacheArtifactRecord> {
    let corrupt = |msg: String| StoreError::CorruptRow(msg);

    let ordering: String = row
        .try_get("ordering")
        .map_err(|e| corrupt(format!("ordering: {e}")))?;
    let cache_version: i64 = row
        .try_get("cache_version")
        .map_err(|e| corrupt(format!("cache_version: {e}")))?;
    let written_ms: i64 = row
        .try_get("written_at")
        .map_err(|e| corrupt(format!("written_at: {e}")))?;

    Ok(CacheArtifactRecord {
        projection_id: row
            .try_get("projection_id")
            .map_err(|e| corrupt(format!("projection_id: {e}")))?,
        scope_key: row
            .try_get("scope_key")
            .map_err(|e| corrupt(format!("scope_key: {e}")))?,
        cache_version: cache_version as u64,
        cache_encrypted: row
            .try_get("cache_encrypted")
            .map_err(|e| corrupt(format!("cache_encrypted: {e}")))?,
        ordering: ordering
            .parse()
            .map_err(|e| corrupt(format!("ordering: {e}")))?,
        cursor: EffectiveCursor::new(
            row.try_get("last_global_seq")
                .map_err(|e| corrupt(format!("last_global_seq: {e}")))?,
            row.try_get("last_pending_commit_seq")
                .map_err(|e| corrupt(format!("last_pending_commit_seq: {e}")))?,
        ),
        last_commit_sequence: row
            .try_get("last_commit_sequence")
            .map_err(|e| corrupt(format!("last_commit_sequence: {e}")))?,
        written_at: Utc
            .timestamp_millis_opt(written_ms)
            .single()
            .ok_or_else(|| corrupt(format!("written_at out of range: {written_ms}")))?,
    })
}

fn index_row_to_record(row: &SqliteRow) -> StoreResult<IndexArtifactRecord> {
    let corrupt = |msg: String| StoreError::CorruptRow(msg);

    let artifact_version: i64 = row
        .try_get("artifact_version")
        .map_err(|e| corrupt(format!("artifact_version: {e}")))?;
    let written_ms: i64 = row
        .try_get("written_at")
        .map_err(|e| corrupt(format!("written_at: {e}")))?;

    Ok(IndexArtifactRecord {
        index_id: row
            .try_get("index_id")
            .map_err(|e| corrupt(format!("index_id: {e}")))?,
        scope_key: row
            .try_get("scope_key")
            .map_err(|e| corrupt(format!("scope_key: {e}")))?,
        artifact_version: artifact_version as u64,
        artifact_encrypted: row
            .try_get("artifact_encrypted")
            .map_err(|e| corrupt(format!("artifact_encrypted: {e}")))?,
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
    })
}

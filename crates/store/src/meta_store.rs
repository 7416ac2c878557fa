//! Projection meta rows: cursor, phase, and ordering per consumer.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use mo_core::{EffectiveCursor, ProjectionOrdering, ProjectionPhase};

use crate::error::{map_sqlx_error, StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionMetaRecord {
    pub projection_id: String,
    pub ordering: ProjectionOrdering,
    pub cursor: EffectiveCursor,
    pub last_commit_sequence: i64,
    pub phase: ProjectionPhase,
    pub updated_at: DateTime<Utc>,
}

impl ProjectionMetaRecord {
    /// Fresh meta for a projection that has never run.
    pub fn initial(projection_id: impl Into<String>, ordering: ProjectionOrdering) -> Self {
        Self {
            projection_id: projection_id.into(),
            ordering,
            cursor: EffectiveCursor::ZERO,
            last_commit_sequence: 0,
            phase: ProjectionPhase::Idle,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectionMetaStore {
    pool: SqlitePool,
}

impl ProjectionMetaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, meta: &ProjectionMetaRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projection_meta (
                projection_id,
                ordering,
                last_global_seq,
                last_pending_commit_seq,
                last_commit_sequence,
                phase,
                updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (projection_id)
            DO UPDATE SET
                ordering = excluded.ordering,
                last_global_seq = excluded.last_global_seq,
                last_pending_commit_seq = excluded.last_pending_commit_seq,
                last_commit_sequence = excluded.last_commit_sequence,
                phase = excluded.phase,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&meta.projection_id)
        .bind(meta.ordering.as_str())
        .bind(meta.cursor.global_sequence)
        .bind(meta.cursor.pending_commit_sequence)
        .bind(meta.last_commit_sequence)
        .bind(meta.phase.as_str())
        .bind(meta.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("projection_meta.upsert", e))?;

        Ok(())
    }

    pub async fn get(&self, projection_id: &str) -> StoreResult<Option<ProjectionMetaRecord>> {
        let row = sqlx::query(
            r#"
            SELECT projection_id,
                   ordering,
                   last_global_seq,
                   last_pending_commit_seq,
                   last_commit_sequence,
                   phase,
                   updated_at
            FROM projection_meta
            WHERE projection_id = ?1
            "#,
        )
        .bind(projection_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("projection_meta.get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let corrupt = |msg: String| StoreError::CorruptRow(msg);

        let ordering: String = row
            .try_get("ordering")
            .map_err(|e| corrupt(format!("ordering: {e}")))?;
        let phase: String = row
            .try_get("phase")
            .map_err(|e| corrupt(format!("phase: {e}")))?;
        let updated_ms: i64 = row
            .try_get("updated_at")
            .map_err(|e| corrupt(format!("updated_at: {e}")))?;

        Ok(Some(ProjectionMetaRecord {
            projection_id: row
                .try_get("projection_id")
                .map_err(|e| corrupt(format!("projection_id: {e}")))?,
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
            phase: phase.parse().map_err(|e| corrupt(format!("phase: {e}")))?,
            updated_at: Utc
                .timestamp_millis_opt(updated_ms)
                .single()
                .ok_or_else(|| corrupt(format!("updated_at out of range: {updated_ms}")))?,
        }))
    }

    /// Remove a projection's meta row (reset).
    pub async fn clear(&self, projection_id: &str) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM projection_meta WHERE projection_id = ?1"#)
            .bind(projection_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("projection_meta.clear", e))?;
        Ok(())
    }

    /// Minimum `last_commit_sequence` across all projections, if any meta
    /// rows exist. The pruning floor.
    pub async fn min_commit_sequence(&self) -> StoreResult<Option<i64>> {
        let row = sqlx::query(r#"SELECT MIN(last_commit_sequence) AS floor FROM projection_meta"#)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("projection_meta.min_commit_sequence", e))?;

        row.try_get("floor")
            .map_err(|e| StoreError::CorruptRow(format!("floor: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::schema::init_store_schema;

    #[tokio::test]
    async fn meta_lifecycle() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_store_schema(&pool).await.unwrap();
        let store = ProjectionMetaStore::new(pool);

        assert!(store.get("goal_list").await.unwrap().is_none());
        assert_eq!(store.min_commit_sequence().await.unwrap(), None);

        let mut meta =
            ProjectionMetaRecord::initial("goal_list", ProjectionOrdering::EffectiveTotalOrder);
        meta.updated_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        store.upsert(&meta).await.unwrap();
        assert_eq!(store.get("goal_list").await.unwrap().unwrap(), meta);

        meta.cursor = EffectiveCursor::new(9, 3);
        meta.last_commit_sequence = 12;
        meta.phase = ProjectionPhase::Running;
        store.upsert(&meta).await.unwrap();
        assert_eq!(store.get("goal_list").await.unwrap().unwrap(), meta);

        let mut other =
            ProjectionMetaRecord::initial("goal_search", ProjectionOrdering::EffectiveTotalOrder);
        other.last_commit_sequence = 4;
        other.updated_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        store.upsert(&other).await.unwrap();
        assert_eq!(store.min_commit_sequence().await.unwrap(), Some(4));

        store.clear("goal_list").await.unwrap();
        assert!(store.get("goal_list").await.unwrap().is_none());
    }
}

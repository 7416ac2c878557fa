//! Command idempotency keys.

use chrono::Utc;
use sqlx::SqlitePool;

use mo_core::AggregateId;

use crate::error::{map_sqlx_error, StoreResult};

#[derive(Debug, Clone)]
pub struct IdempotencyStore {
    pool: SqlitePool,
}

impl IdempotencyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a key; returns `true` when the key was fresh.
    ///
    /// A duplicate key means the command already ran and the caller must
    /// not re-execute it.
    pub async fn register(
        &self,
        idempotency_key: &str,
        command_type: &str,
        aggregate_id: &AggregateId,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO idempotency_keys (
                idempotency_key,
                command_type,
                aggregate_id,
                created_at
            )
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(idempotency_key)
        .bind(command_type)
        .bind(aggregate_id.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("idempotency.register", e))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn contains(&self, idempotency_key: &str) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"SELECT 1 FROM idempotency_keys WHERE idempotency_key = ?1"#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("idempotency.contains", e))?;

        Ok(row.is_some())
    }
}

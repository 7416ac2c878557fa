//! Table definitions.
//!
//! `commit_sequence` is the sqlite rowid with AUTOINCREMENT, which makes it
//! strictly monotonic across all rows and never reused after deletion,
//! exactly the commit-order contract the projections depend on.
//! `global_sequence` lives only in `sync_event_map`; an event row is
//! *pending* precisely when it has no map entry.

use sqlx::SqlitePool;

use crate::error::{map_sqlx_error, StoreResult};

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS events (
        commit_sequence   INTEGER PRIMARY KEY AUTOINCREMENT,
        id                TEXT NOT NULL UNIQUE,
        aggregate_type    TEXT NOT NULL,
        aggregate_id      TEXT NOT NULL,
        event_type        TEXT NOT NULL,
        payload_encrypted BLOB NOT NULL,
        keyring_update    BLOB NULL,
        version           INTEGER NOT NULL CHECK (version > 0),
        occurred_at       INTEGER NOT NULL,
        actor_id          TEXT NULL,
        causation_id      TEXT NULL,
        correlation_id    TEXT NULL,
        epoch             INTEGER NULL,
        UNIQUE (aggregate_type, aggregate_id, version)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_events_aggregate
        ON events (aggregate_id, version)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_event_map (
        event_id   TEXT PRIMARY KEY REFERENCES events (id),
        global_seq INTEGER NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        aggregate_type          TEXT NOT NULL,
        aggregate_id            TEXT PRIMARY KEY,
        snapshot_version        INTEGER NOT NULL,
        snapshot_encrypted      BLOB NOT NULL,
        last_global_seq         INTEGER NOT NULL,
        last_pending_commit_seq INTEGER NOT NULL,
        written_at              INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projection_meta (
        projection_id           TEXT PRIMARY KEY,
        ordering                TEXT NOT NULL,
        last_global_seq         INTEGER NOT NULL DEFAULT 0,
        last_pending_commit_seq INTEGER NOT NULL DEFAULT 0,
        last_commit_sequence    INTEGER NOT NULL DEFAULT 0,
        phase                   TEXT NOT NULL,
        updated_at              INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projection_cache (
        projection_id           TEXT NOT NULL,
        scope_key               TEXT NOT NULL,
        cache_version           INTEGER NOT NULL,
        cache_encrypted         BLOB NOT NULL,
        ordering                TEXT NOT NULL,
        last_global_seq         INTEGER NOT NULL,
        last_pending_commit_seq INTEGER NOT NULL,
        last_commit_sequence    INTEGER NOT NULL,
        written_at              INTEGER NOT NULL,
        PRIMARY KEY (projection_id, scope_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS index_artifacts (
        index_id                TEXT NOT NULL,
        scope_key               TEXT NOT NULL,
        artifact_version        INTEGER NOT NULL,
        artifact_encrypted      BLOB NOT NULL,
        last_global_seq         INTEGER NOT NULL,
        last_pending_commit_seq INTEGER NOT NULL,
        written_at              INTEGER NOT NULL,
        PRIMARY KEY (index_id, scope_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS idempotency_keys (
        idempotency_key TEXT PRIMARY KEY,
        command_type    TEXT NOT NULL,
        aggregate_id    TEXT NOT NULL,
        created_at      INTEGER NOT NULL
    )
    "#,
];

/// Create all engine tables if they do not exist.
pub async fn init_store_schema(pool: &SqlitePool) -> StoreResult<()> {
    for ddl in TABLES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("init_store_schema", e))?;
    }
    Ok(())
}

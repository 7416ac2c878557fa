//! Append-only event store with optimistic concurrency and the
//! effective-total-order scan.

use chrono::TimeZone;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use mo_core::{AggregateId, AggregateType, EffectiveCursor, EventRecord, EventToAppend};

use crate::error::{map_sqlx_error, StoreError, StoreResult};
use crate::notify::{ChangeNotifier, StoreTable};

/// Filter for [`SqliteEventStore::get_all_events`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub aggregate_type: Option<AggregateType>,
    pub aggregate_id: Option<AggregateId>,
    pub event_type: Option<String>,
    pub since_commit_sequence: Option<i64>,
    pub limit: Option<i64>,
}

/// A remote event being materialized into a local row.
///
/// `payload_encrypted` is the original ciphertext bytes as pulled; the
/// store never re-encrypts on this path.
#[derive(Debug, Clone)]
pub struct RemoteEventRow {
    pub id: Uuid,
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub payload_encrypted: Vec<u8>,
    pub keyring_update: Option<Vec<u8>>,
    pub version: u64,
    pub occurred_at: chrono::DateTime<Utc>,
    pub actor_id: Option<String>,
    pub causation_id: Option<String>,
    pub correlation_id: Option<String>,
    pub epoch: Option<u32>,
}

/// One row's version move inside a pending rewrite.
#[derive(Debug, Clone)]
pub struct VersionShift {
    pub event_id: Uuid,
    pub old_version: u64,
    pub new_version: u64,
    /// Payload re-encrypted under the new version's AAD.
    pub new_payload: Vec<u8>,
}

/// SQLite-backed event store.
///
/// Cheap to clone; all clones share the pool and notifier.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
    notifier: ChangeNotifier,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool, notifier: ChangeNotifier) -> Self {
        Self { pool, notifier }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Append events to an aggregate stream.
    ///
    /// Each incoming event must declare exactly `max_version + offset + 1`;
    /// anything else fails the whole batch with `Concurrency`. Inserts run
    /// in one transaction; the UNIQUE `(aggregate_type, aggregate_id,
    /// version)` constraint is the backstop against a concurrent writer
    /// that passed the same check.
    #[instrument(skip(self, events), fields(aggregate_id = %aggregate_id, count = events.len()), err)]
    pub async fn append(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &AggregateId,
        events: Vec<EventToAppend>,
    ) -> StoreResult<Vec<EventRecord>> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("append.begin", e))?;

        let current = current_version(&mut tx, aggregate_type, aggregate_id).await?;

        for (offset, event) in events.iter().enumerate() {
            let expected = current + offset as u64 + 1;
            if event.version != expected {
                return Err(StoreError::Concurrency(format!(
                    "expected version {expected} for {aggregate_id}, got {}",
                    event.version
                )));
            }
        }

        let mut records = Vec::with_capacity(events.len());
        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO events (
                    id,
                    aggregate_type,
                    aggregate_id,
                    event_type,
                    payload_encrypted,
                    keyring_update,
                    version,
                    occurred_at,
                    actor_id,
                    causation_id,
                    correlation_id,
                    epoch
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )
            .bind(event.id.to_string())
            .bind(aggregate_type.as_str())
            .bind(aggregate_id.as_str())
            .bind(&event.event_type)
            .bind(&event.payload_encrypted)
            .bind(&event.keyring_update)
            .bind(event.version as i64)
            .bind(event.occurred_at.timestamp_millis())
            .bind(&event.actor_id)
            .bind(&event.causation_id)
            .bind(&event.correlation_id)
            .bind(event.epoch.map(|e| e as i64))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("append.insert", e))?;

            records.push(EventRecord {
                id: event.id,
                aggregate_type,
                aggregate_id: aggregate_id.clone(),
                event_type: event.event_type,
                payload_encrypted: event.payload_encrypted,
                keyring_update: event.keyring_update,
                version: event.version,
                occurred_at: event.occurred_at,
                actor_id: event.actor_id,
                causation_id: event.causation_id,
                correlation_id: event.correlation_id,
                epoch: event.epoch,
                commit_sequence: result.last_insert_rowid(),
                global_sequence: None,
            });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("append.commit", e))?;

        debug!(count = records.len(), "appended events");
        self.notifier.notify(StoreTable::Events);
        Ok(records)
    }

    /// All events of one aggregate from `from_version`, by version.
    pub async fn get_events(
        &self,
        aggregate_id: &AggregateId,
        from_version: u64,
    ) -> StoreResult<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVENT} WHERE e.aggregate_id = ?1 AND e.version >= ?2 ORDER BY e.version ASC"
        ))
        .bind(aggregate_id.as_str())
        .bind(from_version as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_events", e))?;

        rows.iter().map(row_to_record).collect()
    }

    /// Filtered scan across all aggregates in commit order.
    pub async fn get_all_events(&self, filter: EventFilter) -> StoreResult<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            {SELECT_EVENT}
            WHERE (?1 IS NULL OR e.aggregate_type = ?1)
              AND (?2 IS NULL OR e.aggregate_id = ?2)
              AND (?3 IS NULL OR e.event_type = ?3)
              AND (?4 IS NULL OR e.commit_sequence > ?4)
            ORDER BY e.commit_sequence ASC
            LIMIT ?5
            "#
        ))
        .bind(filter.aggregate_type.map(|t| t.as_str()))
        .bind(filter.aggregate_id.as_ref().map(|a| a.as_str().to_string()))
        .bind(filter.event_type)
        .bind(filter.since_commit_sequence)
        .bind(filter.limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_all_events", e))?;

        rows.iter().map(row_to_record).collect()
    }

    /// Effective-total-order scan for projections.
    ///
    /// Synced rows come first ordered by `global_sequence`, then pending
    /// rows by `commit_sequence`. The `commit_sequence` guard on the synced
    /// branch keeps rows that were already consumed while pending from
    /// being handed out a second time after they acquire a global sequence.
    pub async fn scan_effective(
        &self,
        aggregate_type: AggregateType,
        cursor: EffectiveCursor,
        limit: i64,
    ) -> StoreResult<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            {SELECT_EVENT}
            WHERE e.aggregate_type = ?1
              AND (
                    (m.global_seq IS NOT NULL
                        AND m.global_seq > ?2
                        AND e.commit_sequence > ?3)
                 OR (m.global_seq IS NULL AND e.commit_sequence > ?3)
              )
            ORDER BY (m.global_seq IS NULL) ASC,
                     m.global_seq ASC,
                     e.commit_sequence ASC
            LIMIT ?4
            "#
        ))
        .bind(aggregate_type.as_str())
        .bind(cursor.global_sequence)
        .bind(cursor.pending_commit_sequence)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("scan_effective", e))?;

        rows.iter().map(row_to_record).collect()
    }

    /// Single event by id.
    pub async fn get_event_by_id(&self, id: Uuid) -> StoreResult<Option<EventRecord>> {
        let row = sqlx::query(&format!("{SELECT_EVENT} WHERE e.id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_event_by_id", e))?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Current max version of an aggregate stream (0 when empty).
    pub async fn max_version(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &AggregateId,
    ) -> StoreResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(version), 0) AS current_version
            FROM events
            WHERE aggregate_type = ?1 AND aggregate_id = ?2
            "#,
        )
        .bind(aggregate_type.as_str())
        .bind(aggregate_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("max_version", e))?;

        let version: i64 = row
            .try_get("current_version")
            .map_err(|e| map_sqlx_error("max_version", e))?;
        Ok(version as u64)
    }

    /// Write a remote event row and its global-sequence link atomically.
    #[instrument(skip(self, row), fields(event_id = %row.id, global_sequence), err)]
    pub async fn insert_remote_event(
        &self,
        row: RemoteEventRow,
        global_sequence: i64,
    ) -> StoreResult<EventRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_remote_event.begin", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                id,
                aggregate_type,
                aggregate_id,
                event_type,
                payload_encrypted,
                keyring_update,
                version,
                occurred_at,
                actor_id,
                causation_id,
                correlation_id,
                epoch
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(row.id.to_string())
        .bind(row.aggregate_type.as_str())
        .bind(row.aggregate_id.as_str())
        .bind(&row.event_type)
        .bind(&row.payload_encrypted)
        .bind(&row.keyring_update)
        .bind(row.version as i64)
        .bind(row.occurred_at.timestamp_millis())
        .bind(&row.actor_id)
        .bind(&row.causation_id)
        .bind(&row.correlation_id)
        .bind(row.epoch.map(|e| e as i64))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_remote_event.insert", e))?;

        sqlx::query(r#"INSERT INTO sync_event_map (event_id, global_seq) VALUES (?1, ?2)"#)
            .bind(row.id.to_string())
            .bind(global_sequence)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_remote_event.link", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_remote_event.commit", e))?;

        self.notifier.notify(StoreTable::Events);
        Ok(EventRecord {
            id: row.id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload_encrypted: row.payload_encrypted,
            keyring_update: row.keyring_update,
            version: row.version,
            occurred_at: row.occurred_at,
            actor_id: row.actor_id,
            causation_id: row.causation_id,
            correlation_id: row.correlation_id,
            epoch: row.epoch,
            commit_sequence: result.last_insert_rowid(),
            global_sequence: Some(global_sequence),
        })
    }

    /// Attach a server-assigned global sequence to a local pending row
    /// (push acknowledgement). The row becomes immutable from here on.
    pub async fn link_global_sequence(&self, event_id: Uuid, global_seq: i64) -> StoreResult<()> {
        sqlx::query(r#"INSERT INTO sync_event_map (event_id, global_seq) VALUES (?1, ?2)"#)
            .bind(event_id.to_string())
            .bind(global_seq)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("link_global_sequence", e))?;

        self.notifier.notify(StoreTable::Events);
        Ok(())
    }

    /// Pending (unmapped) rows of an aggregate with `version >=
    /// from_version`, highest version first (the rewrite order).
    pub async fn pending_events_from(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &AggregateId,
        from_version: u64,
    ) -> StoreResult<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            {SELECT_EVENT}
            WHERE e.aggregate_type = ?1
              AND e.aggregate_id = ?2
              AND e.version >= ?3
              AND m.global_seq IS NULL
            ORDER BY e.version DESC
            "#
        ))
        .bind(aggregate_type.as_str())
        .bind(aggregate_id.as_str())
        .bind(from_version as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_events_from", e))?;

        rows.iter().map(row_to_record).collect()
    }

    /// Apply a version rewrite in one transaction, invalidating the
    /// aggregate's snapshot.
    ///
    /// Shifts must target pending rows and arrive highest-version-first so
    /// the UNIQUE version constraint never sees a transient collision. Any
    /// row that changed underneath fails the whole transaction.
    #[instrument(skip(self, shifts), fields(aggregate_id = %aggregate_id, count = shifts.len()), err)]
    pub async fn apply_version_shift(
        &self,
        aggregate_id: &AggregateId,
        shifts: Vec<VersionShift>,
    ) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("apply_version_shift.begin", e))?;

        for shift in &shifts {
            let result = sqlx::query(
                r#"
                UPDATE events
                SET version = ?1,
                    payload_encrypted = ?2
                WHERE id = ?3
                  AND version = ?4
                  AND id NOT IN (SELECT event_id FROM sync_event_map)
                "#,
            )
            .bind(shift.new_version as i64)
            .bind(&shift.new_payload)
            .bind(shift.event_id.to_string())
            .bind(shift.old_version as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("apply_version_shift.update", e))?;

            if result.rows_affected() != 1 {
                return Err(StoreError::Concurrency(format!(
                    "pending row {} changed during version rewrite",
                    shift.event_id
                )));
            }
        }

        sqlx::query(r#"DELETE FROM snapshots WHERE aggregate_id = ?1"#)
            .bind(aggregate_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("apply_version_shift.snapshots", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("apply_version_shift.commit", e))?;

        self.notifier.notify(StoreTable::Events);
        self.notifier.notify(StoreTable::Snapshots);
        Ok(())
    }

    /// Delete synced events up to a commit sequence.
    ///
    /// Pending rows are never pruned (they have not been pushed). The
    /// caller is responsible for the cursor guard: nothing newer than every
    /// projection's cursor minus the tail window may go.
    pub async fn prune_events_before(&self, commit_sequence: i64) -> StoreResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("prune.begin", e))?;

        let result = sqlx::query(
            r#"
            DELETE FROM events
            WHERE commit_sequence <= ?1
              AND id IN (SELECT event_id FROM sync_event_map)
            "#,
        )
        .bind(commit_sequence)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("prune.events", e))?;

        // The map rows of pruned events go with them.
        sqlx::query(
            r#"
            DELETE FROM sync_event_map
            WHERE event_id NOT IN (SELECT id FROM events)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("prune.map", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("prune.commit", e))?;

        Ok(result.rows_affected())
    }
}

const SELECT_EVENT: &str = r#"
    SELECT e.commit_sequence,
           e.id,
           e.aggregate_type,
           e.aggregate_id,
           e.event_type,
           e.payload_encrypted,
           e.keyring_update,
           e.version,
           e.occurred_at,
           e.actor_id,
           e.causation_id,
           e.correlation_id,
           e.epoch,
           m.global_seq
    FROM events e
    LEFT JOIN sync_event_map m ON m.event_id = e.id
"#;

async fn current_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    aggregate_type: AggregateType,
    aggregate_id: &AggregateId,
) -> StoreResult<u64> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(version), 0) AS current_version
        FROM events
        WHERE aggregate_type = ?1 AND aggregate_id = ?2
        "#,
    )
    .bind(aggregate_type.as_str())
    .bind(aggregate_id.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("current_version", e))?;

    let version: i64 = row
        .try_get("current_version")
        .map_err(|e| map_sqlx_error("current_version", e))?;
    Ok(version as u64)
}

fn row_to_record(row: &SqliteRow) -> StoreResult<EventRecord> {
    let corrupt = |msg: String| StoreError::CorruptRow(msg);

    let id_str: String = row
        .try_get("id")
        .map_err(|e| corrupt(format!("id: {e}")))?;
    let id = Uuid::parse_str(&id_str).map_err(|e| corrupt(format!("id: {e}")))?;

    let type_str: String = row
        .try_get("aggregate_type")
        .map_err(|e| corrupt(format!("aggregate_type: {e}")))?;
    let aggregate_type = type_str
        .parse::<AggregateType>()
        .map_err(|e| corrupt(format!("aggregate_type: {e}")))?;

    let aggregate_id: String = row
        .try_get("aggregate_id")
        .map_err(|e| corrupt(format!("aggregate_id: {e}")))?;

    let occurred_ms: i64 = row
        .try_get("occurred_at")
        .map_err(|e| corrupt(format!("occurred_at: {e}")))?;
    let occurred_at = Utc
        .timestamp_millis_opt(occurred_ms)
        .single()
        .ok_or_else(|| corrupt(format!("occurred_at out of range: {occurred_ms}")))?;

    let version: i64 = row
        .try_get("version")
        .map_err(|e| corrupt(format!("version: {e}")))?;
    let epoch: Option<i64> = row
        .try_get("epoch")
        .map_err(|e| corrupt(format!("epoch: {e}")))?;

    Ok(EventRecord {
        id,
        aggregate_type,
        aggregate_id: AggregateId::new(aggregate_id),
        event_type: row
            .try_get("event_type")
            .map_err(|e| corrupt(format!("event_type: {e}")))?,
        payload_encrypted: row
            .try_get("payload_encrypted")
            .map_err(|e| corrupt(format!("payload_encrypted: {e}")))?,
        keyring_update: row
            .try_get("keyring_update")
            .map_err(|e| corrupt(format!("keyring_update: {e}")))?,
        version: version as u64,
        occurred_at,
        actor_id: row
            .try_get("actor_id")
            .map_err(|e| corrupt(format!("actor_id: {e}")))?,
        causation_id: row
            .try_get("causation_id")
            .map_err(|e| corrupt(format!("causation_id: {e}")))?,
        correlation_id: row
            .try_get("correlation_id")
            .map_err(|e| corrupt(format!("correlation_id: {e}")))?,
        epoch: epoch.map(|e| e as u32),
        commit_sequence: row
            .try_get("commit_sequence")
            .map_err(|e| corrupt(format!("commit_sequence: {e}")))?,
        global_sequence: row
            .try_get("global_seq")
            .map_err(|e| corrupt(format!("global_seq: {e}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::schema::init_store_schema;

    async fn test_store() -> SqliteEventStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_store_schema(&pool).await.unwrap();
        SqliteEventStore::new(pool, ChangeNotifier::new())
    }

    fn goal_id() -> AggregateId {
        AggregateId::new("goal-abc")
    }

    fn event(version: u64) -> EventToAppend {
        EventToAppend {
            id: Uuid::now_v7(),
            event_type: "goal.created".to_string(),
            payload_encrypted: vec![version as u8; 32],
            keyring_update: None,
            version,
            occurred_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            actor_id: None,
            causation_id: None,
            correlation_id: None,
            epoch: None,
        }
    }

    #[tokio::test]
    async fn append_assigns_dense_versions_and_commit_sequences() {
        let store = test_store().await;

        let first = store
            .append(AggregateType::Goal, &goal_id(), vec![event(1), event(2)])
            .await
            .unwrap();
        let second = store
            .append(AggregateType::Goal, &goal_id(), vec![event(3)])
            .await
            .unwrap();

        let versions: Vec<u64> = store
            .get_events(&goal_id(), 1)
            .await
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let sequences: Vec<i64> = first
            .iter()
            .chain(second.iter())
            .map(|e| e.commit_sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stale_version_fails_with_concurrency() {
        let store = test_store().await;

        store
            .append(AggregateType::Goal, &goal_id(), vec![event(1), event(2)])
            .await
            .unwrap();

        // Expected version is 3 now.
        let err = store
            .append(AggregateType::Goal, &goal_id(), vec![event(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        // Nothing was written.
        assert_eq!(store.get_events(&goal_id(), 1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn gapped_batch_fails_atomically() {
        let store = test_store().await;

        let err = store
            .append(AggregateType::Goal, &goal_id(), vec![event(1), event(3)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert!(store.get_events(&goal_id(), 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_append_is_a_no_op() {
        let store = test_store().await;
        assert!(store
            .append(AggregateType::Goal, &goal_id(), vec![])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn version_streams_are_scoped_per_aggregate() {
        let store = test_store().await;
        store
            .append(AggregateType::Goal, &goal_id(), vec![event(1)])
            .await
            .unwrap();
        store
            .append(
                AggregateType::Project,
                &AggregateId::new("project-p1"),
                vec![event(1)],
            )
            .await
            .unwrap();

        assert_eq!(
            store.max_version(AggregateType::Goal, &goal_id()).await.unwrap(),
            1
        );
        assert_eq!(
            store
                .max_version(AggregateType::Project, &AggregateId::new("project-p1"))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn effective_order_is_stable_under_rebase() {
        let store = test_store().await;
        let a = AggregateId::new("goal-a");
        let b = AggregateId::new("goal-b");

        // e1(cs=1, gs=1), e2(cs=2, pending), e3(cs=3, gs=2), e4(cs=4, pending)
        let e1 = store
            .append(AggregateType::Goal, &a, vec![event(1)])
            .await
            .unwrap()
            .remove(0);
        let e2 = store
            .append(AggregateType::Goal, &a, vec![event(2)])
            .await
            .unwrap()
            .remove(0);
        let e3 = store
            .append(AggregateType::Goal, &b, vec![event(1)])
            .await
            .unwrap()
            .remove(0);
        let e4 = store
            .append(AggregateType::Goal, &b, vec![event(2)])
            .await
            .unwrap()
            .remove(0);

        store.link_global_sequence(e1.id, 1).await.unwrap();
        store.link_global_sequence(e3.id, 2).await.unwrap();

        let order: Vec<Uuid> = store
            .scan_effective(AggregateType::Goal, EffectiveCursor::ZERO, 100)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(order, vec![e1.id, e3.id, e2.id, e4.id]);

        // Rebase: the pending rows acquire global sequences; a fresh scan
        // yields the same order.
        store.link_global_sequence(e2.id, 3).await.unwrap();
        store.link_global_sequence(e4.id, 4).await.unwrap();

        let order_after: Vec<Uuid> = store
            .scan_effective(AggregateType::Goal, EffectiveCursor::ZERO, 100)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(order_after, vec![e1.id, e3.id, e2.id, e4.id]);
    }

    #[tokio::test]
    async fn effective_scan_does_not_replay_consumed_rows_after_rebase() {
        let store = test_store().await;
        let a = goal_id();

        let e1 = store
            .append(AggregateType::Goal, &a, vec![event(1)])
            .await
            .unwrap()
            .remove(0);

        // Consumed while pending: cursor covers its commit sequence.
        let cursor = EffectiveCursor::new(0, e1.commit_sequence);
        assert!(store
            .scan_effective(AggregateType::Goal, cursor, 100)
            .await
            .unwrap()
            .is_empty());

        // After it syncs, the commit-sequence guard still excludes it.
        store.link_global_sequence(e1.id, 7).await.unwrap();
        assert!(store
            .scan_effective(AggregateType::Goal, cursor, 100)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn get_all_events_filters_and_orders_by_commit_sequence() {
        let store = test_store().await;
        let a = goal_id();
        store
            .append(AggregateType::Goal, &a, vec![event(1), event(2)])
            .await
            .unwrap();
        store
            .append(
                AggregateType::Project,
                &AggregateId::new("project-p1"),
                vec![event(1)],
            )
            .await
            .unwrap();

        let all = store.get_all_events(EventFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].commit_sequence < w[1].commit_sequence));

        let only_a = store
            .get_all_events(EventFilter {
                aggregate_id: Some(a.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);

        let since = store
            .get_all_events(EventFilter {
                since_commit_sequence: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(since.len(), 1);

        let limited = store
            .get_all_events(EventFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn version_shift_moves_pending_rows_and_drops_snapshots() {
        let store = test_store().await;
        let a = goal_id();

        let e1 = store
            .append(AggregateType::Goal, &a, vec![event(1)])
            .await
            .unwrap()
            .remove(0);
        let e2 = store
            .append(AggregateType::Goal, &a, vec![event(2)])
            .await
            .unwrap()
            .remove(0);

        store
            .apply_version_shift(
                &a,
                vec![
                    VersionShift {
                        event_id: e2.id,
                        old_version: 2,
                        new_version: 3,
                        new_payload: vec![0xBB; 32],
                    },
                    VersionShift {
                        event_id: e1.id,
                        old_version: 1,
                        new_version: 2,
                        new_payload: vec![0xAA; 32],
                    },
                ],
            )
            .await
            .unwrap();

        let versions: Vec<u64> = store
            .get_events(&a, 1)
            .await
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn version_shift_refuses_synced_rows() {
        let store = test_store().await;
        let a = goal_id();

        let e1 = store
            .append(AggregateType::Goal, &a, vec![event(1)])
            .await
            .unwrap()
            .remove(0);
        store.link_global_sequence(e1.id, 1).await.unwrap();

        let err = store
            .apply_version_shift(
                &a,
                vec![VersionShift {
                    event_id: e1.id,
                    old_version: 1,
                    new_version: 2,
                    new_payload: vec![0; 32],
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        // Transaction rolled back: version unchanged.
        assert_eq!(store.get_events(&a, 1).await.unwrap()[0].version, 1);
    }

    #[tokio::test]
    async fn prune_only_removes_synced_rows_and_keeps_sequences() {
        let store = test_store().await;
        let a = goal_id();

        let e1 = store
            .append(AggregateType::Goal, &a, vec![event(1)])
            .await
            .unwrap()
            .remove(0);
        store
            .append(AggregateType::Goal, &a, vec![event(2)])
            .await
            .unwrap();
        store.link_global_sequence(e1.id, 1).await.unwrap();

        let pruned = store.prune_events_before(2).await.unwrap();
        assert_eq!(pruned, 1);

        // The pending row survived and kept its commit sequence; new rows
        // never reuse the pruned one (AUTOINCREMENT).
        let remaining = store.get_events(&a, 1).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].commit_sequence, 2);

        let e3 = store
            .append(AggregateType::Goal, &a, vec![event(3)])
            .await
            .unwrap()
            .remove(0);
        assert_eq!(e3.commit_sequence, 3);
    }
}

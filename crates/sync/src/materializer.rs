//! Remote record materialization.

use std::time::Duration;

use tracing::{debug, instrument};
use uuid::Uuid;

use mo_core::{binding, AggregateId, AggregateType, EventRecord};
use mo_keyring::KeyringManager;
use mo_store::{RemoteEventRow, SqliteEventStore};

use crate::error::{SyncError, SyncResult};
use crate::record::RemoteEventRecord;

const CONVERGENCE_RETRIES: u32 = 50;
const CONVERGENCE_TICK: Duration = Duration::from_millis(5);

/// Turns pulled remote records into local event rows.
#[derive(Debug, Clone)]
pub struct RemoteMaterializer {
    store: SqliteEventStore,
    keyring: KeyringManager,
}

impl RemoteMaterializer {
    pub fn new(store: SqliteEventStore, keyring: KeyringManager) -> Self {
        Self { store, keyring }
    }

    /// Validate and persist one pulled record.
    ///
    /// Ingests any in-band keyring update, resolves the declared epoch's
    /// DEK, decrypts the envelope to check `meta.event_id` against the
    /// transport's id, then writes the row (original ciphertext bytes)
    /// plus its `sync_event_map` link in one transaction.
    #[instrument(skip(self, record_json), fields(event_id = %event_id, global_sequence), err)]
    pub async fn materialize_remote_event(
        &self,
        event_id: Uuid,
        record_json: &str,
        global_sequence: i64,
    ) -> SyncResult<EventRecord> {
        let record: RemoteEventRecord = serde_json::from_str(record_json)
            .map_err(|e| SyncError::MalformedRecord(e.to_string()))?;

        if let Some(update) = &record.keyring_update {
            self.keyring
                .ingest_keyring_update(&record.aggregate_id, update)
                .await?;
        }

        let dek = self
            .keyring
            .resolve_key_for_epoch(&record.aggregate_id, record.epoch.unwrap_or(0))
            .await?;

        let aad = binding::event_aad(record.aggregate_type, &record.aggregate_id, record.version);
        let plain = mo_crypto::decrypt(&record.payload, &dek, &aad)?;
        let (meta, _event) = mo_events::decode_envelope(&plain)?;

        if meta.event_id != event_id {
            return Err(SyncError::EventIdMismatch {
                expected: event_id,
                found: meta.event_id,
            });
        }
        if meta.event_type != record.event_type {
            return Err(SyncError::MalformedRecord(format!(
                "record event_type '{}' disagrees with envelope '{}'",
                record.event_type, meta.event_type
            )));
        }

        let row = self
            .store
            .insert_remote_event(
                RemoteEventRow {
                    id: event_id,
                    aggregate_type: record.aggregate_type,
                    aggregate_id: record.aggregate_id,
                    event_type: record.event_type,
                    payload_encrypted: record.payload,
                    keyring_update: record.keyring_update,
                    version: record.version,
                    occurred_at: meta.occurred_at,
                    actor_id: meta.actor_id,
                    causation_id: meta.causation_id,
                    correlation_id: meta.correlation_id,
                    epoch: record.epoch,
                },
                global_sequence,
            )
            .await?;

        debug!(version = row.version, "materialized remote event");
        Ok(row)
    }

    /// Wait until the local store reflects `version` for an aggregate.
    ///
    /// Bounded poll (50 × 5 ms); the transport calls this after rewrites
    /// and materialization before advancing its pull cursor.
    pub async fn wait_for_local_version(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &AggregateId,
        version: u64,
    ) -> SyncResult<()> {
        for _ in 0..CONVERGENCE_RETRIES {
            if self.store.max_version(aggregate_type, aggregate_id).await? >= version {
                return Ok(());
            }
            tokio::time::sleep(CONVERGENCE_TICK).await;
        }

        Err(SyncError::Timeout {
            aggregate_id: aggregate_id.clone(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mo_crypto::SymmetricKey;
    use mo_events::{encode_envelope, DomainEvent, EventMeta, GoalCreated};
    use mo_keyring::{init_keyring_schema, AggregateKeyStore, KeyringStateStore, MasterKeyHolder};
    use mo_store::{init_store_schema, ChangeNotifier};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_store_schema(&pool).await.unwrap();
        init_keyring_schema(&pool).await.unwrap();
        pool
    }

    fn manager(pool: &SqlitePool, master: &MasterKeyHolder) -> KeyringManager {
        KeyringManager::new(
            master.clone(),
            AggregateKeyStore::new(pool.clone(), master.clone()),
            KeyringStateStore::new(pool.clone()),
        )
    }

    /// Build the record another device would have pushed.
    async fn remote_record(
        master: &MasterKeyHolder,
        aggregate_id: &str,
        version: u64,
    ) -> (Uuid, String) {
        // The "other device": own stores, same master key.
        let other_pool = pool().await;
        let other = manager(&other_pool, master);

        let id = AggregateId::new(aggregate_id);
        let dek = SymmetricKey::generate();
        let t = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let update = other
            .create_initial_update(&id, &dek, t)
            .await
            .unwrap()
            .unwrap();

        let event_id = Uuid::now_v7();
        let plain = encode_envelope(
            EventMeta {
                event_id,
                event_type: "goal.created".to_string(),
                occurred_at: t,
                actor_id: Some("device-x".to_string()),
                causation_id: None,
                correlation_id: None,
            },
            &DomainEvent::GoalCreated(GoalCreated {
                title: "Synced goal".to_string(),
                color: "slate".to_string(),
                target_date: None,
            }),
        )
        .unwrap();

        let aad = binding::event_aad(AggregateType::Goal, &id, version);
        let record = RemoteEventRecord {
            aggregate_type: AggregateType::Goal,
            aggregate_id: id,
            event_type: "goal.created".to_string(),
            version,
            epoch: Some(0),
            payload: mo_crypto::encrypt(&plain, &dek, &aad).unwrap(),
            keyring_update: Some(update.keyring_update),
        };

        (event_id, serde_json::to_string(&record).unwrap())
    }

    #[tokio::test]
    async fn materializes_the_original_ciphertext_with_its_link() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());
        let (event_id, json) = remote_record(&master, "goal-abc", 1).await;

        let local_pool = pool().await;
        let keyring = manager(&local_pool, &master);
        let store = SqliteEventStore::new(local_pool.clone(), ChangeNotifier::new());
        let materializer = RemoteMaterializer::new(store.clone(), keyring.clone());

        let row = materializer
            .materialize_remote_event(event_id, &json, 42)
            .await
            .unwrap();
        assert_eq!(row.global_sequence, Some(42));
        assert_eq!(row.version, 1);
        assert_eq!(row.actor_id.as_deref(), Some("device-x"));

        // The stored bytes are the pulled bytes, and the learned keyring
        // decrypts them.
        let record: RemoteEventRecord = serde_json::from_str(&json).unwrap();
        let stored = store.get_event_by_id(event_id).await.unwrap().unwrap();
        assert_eq!(stored.payload_encrypted, record.payload);

        let dek = keyring.resolve_key_for_event(&stored).await.unwrap();
        let aad = binding::event_aad(AggregateType::Goal, &stored.aggregate_id, 1);
        assert!(mo_crypto::decrypt(&stored.payload_encrypted, &dek, &aad).is_ok());

        materializer
            .wait_for_local_version(AggregateType::Goal, &stored.aggregate_id, 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn event_id_mismatch_is_rejected() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());
        let (_event_id, json) = remote_record(&master, "goal-abc", 1).await;

        let local_pool = pool().await;
        let materializer = RemoteMaterializer::new(
            SqliteEventStore::new(local_pool.clone(), ChangeNotifier::new()),
            manager(&local_pool, &master),
        );

        let forged_id = Uuid::now_v7();
        let err = materializer
            .materialize_remote_event(forged_id, &json, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::EventIdMismatch { .. }));

        // Nothing was written.
        let store = SqliteEventStore::new(local_pool, ChangeNotifier::new());
        assert!(store.get_event_by_id(forged_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn convergence_wait_times_out_when_nothing_arrives() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());
        let local_pool = pool().await;
        let materializer = RemoteMaterializer::new(
            SqliteEventStore::new(local_pool.clone(), ChangeNotifier::new()),
            manager(&local_pool, &master),
        );

        let err = materializer
            .wait_for_local_version(AggregateType::Goal, &AggregateId::new("goal-never"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout { version: 1, .. }));
    }
}

//! Committed-event publisher: at-least-once delivery to in-process
//! subscribers, one durable cursor per stream.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use mo_core::{binding, AggregateType, ProjectionOrdering, ProjectionPhase};
use mo_events::{CommittedEvent, CommittedEventBus};
use mo_keyring::KeyringManager;
use mo_store::{
    EventFilter, ProjectionMetaRecord, ProjectionMetaStore, SqliteEventStore, StoreTable,
};

use crate::error::RuntimeResult;
use crate::task_runner::TaskRunner;

const DEFAULT_BATCH_SIZE: i64 = 200;

/// Publishes decoded domain events for one stream (`goals`, `projects`).
///
/// The cursor is a `projection_meta` row in commit-sequence ordering. A
/// crash between publish and cursor persistence re-publishes the batch on
/// the next run; subscribers must be idempotent.
pub struct CommittedEventPublisher {
    stream: String,
    aggregate_type: AggregateType,
    store: SqliteEventStore,
    meta: ProjectionMetaStore,
    keyring: KeyringManager,
    bus: CommittedEventBus,
    runner: TaskRunner,
    batch_size: i64,
}

impl CommittedEventPublisher {
    pub fn new(
        stream: impl Into<String>,
        aggregate_type: AggregateType,
        store: SqliteEventStore,
        meta: ProjectionMetaStore,
        keyring: KeyringManager,
        bus: CommittedEventBus,
    ) -> Self {
        let stream = stream.into();
        let runner = TaskRunner::new(format!("committed_publisher:{stream}"));
        Self {
            stream,
            aggregate_type,
            store,
            meta,
            keyring,
            bus,
            runner,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Meta row id of this stream's cursor.
    pub fn projection_id(&self) -> String {
        format!("committed_publisher:{}", self.stream)
    }

    /// Publish everything past the cursor. Returns the number of events
    /// delivered.
    pub async fn run_once(&self) -> RuntimeResult<usize> {
        let projection_id = self.projection_id();

        let mut meta = match self.meta.get(&projection_id).await? {
            Some(meta) => meta,
            None => ProjectionMetaRecord::initial(&projection_id, ProjectionOrdering::CommitSequence),
        };

        let mut published = 0usize;
        loop {
            let rows = self
                .store
                .get_all_events(EventFilter {
                    aggregate_type: Some(self.aggregate_type),
                    since_commit_sequence: Some(meta.last_commit_sequence),
                    limit: Some(self.batch_size),
                    ..Default::default()
                })
                .await?;
            if rows.is_empty() {
                return Ok(published);
            }
            let exhausted = (rows.len() as i64) < self.batch_size;

            let mut batch = Vec::with_capacity(rows.len());
            let mut max_sequence = meta.last_commit_sequence;

            for row in rows {
                max_sequence = max_sequence.max(row.commit_sequence);

                let dek = match self.keyring.resolve_key_for_event(&row).await {
                    Ok(dek) => dek,
                    Err(mo_keyring::KeyringError::MasterKeyNotSet) => {
                        // Abort without advancing; the next tick retries.
                        return Err(mo_keyring::KeyringError::MasterKeyNotSet.into());
                    }
                    Err(err @ mo_keyring::KeyringError::MissingKey { .. }) => {
                        warn!(event_id = %row.id, error = %err,
                            "skipping unpublishable event, advancing past it");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };

                let aad = binding::event_aad(row.aggregate_type, &row.aggregate_id, row.version);
                let plain = mo_crypto::decrypt(&row.payload_encrypted, &dek, &aad)?;
                let (event_meta, event) = mo_events::decode_envelope(&plain)?;

                batch.push(CommittedEvent {
                    record_id: row.id,
                    aggregate_type: row.aggregate_type,
                    aggregate_id: row.aggregate_id,
                    version: row.version,
                    commit_sequence: row.commit_sequence,
                    meta: event_meta,
                    event,
                });
            }

            // Subscriber errors propagate before the cursor moves: the
            // whole batch redelivers next run.
            if !batch.is_empty() {
                self.bus.publish_all(&batch)?;
                published += batch.len();
            }

            meta.last_commit_sequence = max_sequence;
            meta.phase = ProjectionPhase::Idle;
            meta.updated_at = Utc::now();
            self.meta.upsert(&meta).await?;
            debug!(stream = %self.stream, cursor = max_sequence, "publisher cursor advanced");

            if exhausted {
                return Ok(published);
            }
        }
    }

    /// Serialized trigger; overlapping calls coalesce.
    pub async fn publish_pending(&self) {
        self.runner.run(|| async { self.run_once().await.map(|_| ()) }).await;
    }

    /// Spawn the notification loop.
    pub fn start(self: Arc<Self>) -> PublisherLoopHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let publisher = self;

        let join = tokio::spawn(async move {
            let mut changes = publisher.store.notifier().subscribe();
            publisher.publish_pending().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    received = changes.recv() => match received {
                        Ok(StoreTable::Events) => publisher.publish_pending().await,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            publisher.publish_pending().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        PublisherLoopHandle { shutdown_tx, join }
    }
}

/// Handle on the spawned publisher loop.
pub struct PublisherLoopHandle {
    shutdown_tx: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl PublisherLoopHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

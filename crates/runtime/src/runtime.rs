//! The projection runtime: serialized batch processing over the log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use mo_core::{binding, EventRecord, ProjectionOrdering, ProjectionPhase};
use mo_events::CommittedEvent;
use mo_keyring::KeyringManager;
use mo_store::{
    EventFilter, ProjectionMetaRecord, ProjectionMetaStore, SqliteEventStore, StoreTable,
};

use crate::error::RuntimeResult;
use crate::projection::{Bootstrap, Projection};
use crate::task_runner::TaskRunner;

/// Events kept behind every projection's cursor when pruning.
pub const TAIL_WINDOW: i64 = 10;

const DEFAULT_BATCH_SIZE: i64 = 200;

struct Registered {
    runner: TaskRunner,
    projection: tokio::sync::Mutex<Box<dyn Projection>>,
    bootstrapped: AtomicBool,
    rebuild_requested: AtomicBool,
}

/// Owns every registered projection and drives them from change
/// notifications.
///
/// Each projection is single-writer: its `TaskRunner` coalesces
/// overlapping triggers. Different projections progress independently.
pub struct ProjectionRuntime {
    store: SqliteEventStore,
    meta: ProjectionMetaStore,
    keyring: KeyringManager,
    batch_size: i64,
    projections: Vec<Arc<Registered>>,
}

impl ProjectionRuntime {
    pub fn new(
        store: SqliteEventStore,
        meta: ProjectionMetaStore,
        keyring: KeyringManager,
    ) -> Self {
        Self {
            store,
            meta,
            keyring,
            batch_size: DEFAULT_BATCH_SIZE,
            projections: Vec::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Register a projection. Call before `start`.
    pub fn register(&mut self, projection: Box<dyn Projection>) {
        let runner = TaskRunner::new(projection.projection_id().to_string());
        self.projections.push(Arc::new(Registered {
            runner,
            projection: tokio::sync::Mutex::new(projection),
            bootstrapped: AtomicBool::new(false),
            rebuild_requested: AtomicBool::new(false),
        }));
    }

    /// Drive every projection once (bootstrap, drain, persist).
    ///
    /// The notification loop calls this; tests and the sync engine may
    /// call it directly to process synchronously.
    pub async fn process_all(&self) {
        for registered in &self.projections {
            let registered = registered.clone();
            registered
                .runner
                .run(|| self.process_one(&registered))
                .await;
        }
    }

    /// Rebuild every projection from scratch (rebase handling).
    ///
    /// Sets the rebuild flag and schedules processing; an active batch
    /// finishes first, then the rerun performs the rebuild.
    pub async fn on_rebase_required(&self) {
        info!("rebase required: rebuilding all projections");
        for registered in &self.projections {
            registered.rebuild_requested.store(true, Ordering::SeqCst);
        }
        self.process_all().await;
    }

    /// Spawn the notification loop. Stop via the returned handle; a stop
    /// takes effect after the active pass completes.
    pub fn start(self: Arc<Self>) -> RuntimeLoopHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let runtime = self;

        let join = tokio::spawn(async move {
            let mut changes = runtime.store.notifier().subscribe();
            // Catch up on anything appended before we subscribed.
            runtime.process_all().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    received = changes.recv() => match received {
                        Ok(StoreTable::Events) => runtime.process_all().await,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "change notifications lagged, processing");
                            runtime.process_all().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        RuntimeLoopHandle { shutdown_tx, join }
    }

    /// Delete synced events every projection has long consumed.
    ///
    /// Keeps a tail window behind the slowest cursor; a store with no
    /// projection meta is never pruned. Optional maintenance, safe to skip.
    pub async fn prune(&self) -> RuntimeResult<u64> {
        let Some(floor) = self.meta.min_commit_sequence().await? else {
            return Ok(0);
        };

        let threshold = floor - TAIL_WINDOW;
        if threshold <= 0 {
            return Ok(0);
        }
        let pruned = self.store.prune_events_before(threshold).await?;
        if pruned > 0 {
            info!(pruned, threshold, "pruned consumed events");
        }
        Ok(pruned)
    }

    async fn process_one(&self, registered: &Registered) -> RuntimeResult<()> {
        let mut projection = registered.projection.lock().await;

        if !registered.bootstrapped.load(Ordering::SeqCst) {
            match projection.bootstrap().await? {
                Bootstrap::Ready => {}
                Bootstrap::NeedsRebuild => {
                    registered.rebuild_requested.store(true, Ordering::SeqCst);
                }
            }
            registered.bootstrapped.store(true, Ordering::SeqCst);
        }

        if registered.rebuild_requested.swap(false, Ordering::SeqCst) {
            self.rebuild(projection.as_mut()).await?;
            return Ok(());
        }

        self.drain(projection.as_mut(), ProjectionPhase::Running).await
    }

    /// Reset a projection and replay from cursor zero.
    async fn rebuild(&self, projection: &mut dyn Projection) -> RuntimeResult<()> {
        let projection_id = projection.projection_id().to_string();
        info!(projection = %projection_id, "rebuilding");

        let mut meta = ProjectionMetaRecord::initial(&projection_id, projection.ordering());
        meta.phase = ProjectionPhase::Rebuilding;
        self.meta.upsert(&meta).await?;

        projection.reset().await?;
        self.drain(projection, ProjectionPhase::Rebuilding).await
    }

    /// Read batches at the projection's cursor until the log is drained.
    async fn drain(
        &self,
        projection: &mut dyn Projection,
        phase: ProjectionPhase,
    ) -> RuntimeResult<()> {
        let projection_id = projection.projection_id().to_string();

        let mut meta = match self.meta.get(&projection_id).await? {
            Some(meta) => meta,
            None => ProjectionMetaRecord::initial(&projection_id, projection.ordering()),
        };
        if phase == ProjectionPhase::Rebuilding {
            meta = ProjectionMetaRecord::initial(&projection_id, projection.ordering());
        }

        meta.phase = phase;
        meta.updated_at = Utc::now();
        self.meta.upsert(&meta).await?;

        let result = self.drain_inner(projection, &mut meta).await;

        // Whatever happened, leave the phase consistent. The cursor in
        // `meta` only reflects fully applied batches.
        meta.phase = ProjectionPhase::Idle;
        meta.updated_at = Utc::now();
        self.meta.upsert(&meta).await?;

        result
    }

    async fn drain_inner(
        &self,
        projection: &mut dyn Projection,
        meta: &mut ProjectionMetaRecord,
    ) -> RuntimeResult<()> {
        loop {
            let rows = self.read_batch(projection, meta).await?;
            if rows.is_empty() {
                return Ok(());
            }
            let exhausted = (rows.len() as i64) < self.batch_size;

            let mut cursor = meta.cursor;
            let mut last_commit = meta.last_commit_sequence;
            let mut any_changed = false;

            for row in rows {
                match self.keyring.resolve_key_for_event(&row).await {
                    Ok(dek) => {
                        let aad = binding::event_aad(
                            row.aggregate_type,
                            &row.aggregate_id,
                            row.version,
                        );
                        let plain = mo_crypto::decrypt(&row.payload_encrypted, &dek, &aad)?;
                        let (event_meta, event) = mo_events::decode_envelope(&plain)?;

                        let committed = CommittedEvent {
                            record_id: row.id,
                            aggregate_type: row.aggregate_type,
                            aggregate_id: row.aggregate_id.clone(),
                            version: row.version,
                            commit_sequence: row.commit_sequence,
                            meta: event_meta,
                            event,
                        };

                        let applied = projection.apply_event(&row, &committed, &dek).await?;
                        any_changed |= applied.changed;
                    }
                    Err(mo_keyring::KeyringError::MasterKeyNotSet) => {
                        // Deferral: nothing advances, next tick retries.
                        return Err(mo_keyring::KeyringError::MasterKeyNotSet.into());
                    }
                    Err(err @ mo_keyring::KeyringError::MissingKey { .. }) => {
                        // Skip the event but move past it, or the
                        // projection wedges on a key that may never arrive.
                        warn!(event_id = %row.id, error = %err, "skipping event with unresolvable key");
                    }
                    Err(err) => return Err(err.into()),
                }

                advance(&mut cursor, &mut last_commit, &row);
            }

            if any_changed || cursor != meta.cursor {
                projection.persist(cursor, last_commit).await?;
            }

            meta.cursor = cursor;
            meta.last_commit_sequence = last_commit;
            meta.updated_at = Utc::now();
            self.meta.upsert(meta).await?;

            if exhausted {
                return Ok(());
            }
        }
    }

    async fn read_batch(
        &self,
        projection: &dyn Projection,
        meta: &ProjectionMetaRecord,
    ) -> RuntimeResult<Vec<EventRecord>> {
        let rows = match projection.ordering() {
            ProjectionOrdering::EffectiveTotalOrder => {
                self.store
                    .scan_effective(projection.aggregate_type(), meta.cursor, self.batch_size)
                    .await?
            }
            ProjectionOrdering::CommitSequence => {
                self.store
                    .get_all_events(EventFilter {
                        aggregate_type: Some(projection.aggregate_type()),
                        since_commit_sequence: Some(meta.last_commit_sequence),
                        limit: Some(self.batch_size),
                        ..Default::default()
                    })
                    .await?
            }
        };
        Ok(rows)
    }
}

fn advance(cursor: &mut mo_core::EffectiveCursor, last_commit: &mut i64, row: &EventRecord) {
    match row.global_sequence {
        Some(global) => cursor.global_sequence = global,
        None => cursor.pending_commit_sequence = row.commit_sequence,
    }
    *last_commit = (*last_commit).max(row.commit_sequence);
}

/// Handle on the spawned notification loop.
pub struct RuntimeLoopHandle {
    shutdown_tx: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl RuntimeLoopHandle {
    /// Request a stop and wait for the loop to finish its active pass.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

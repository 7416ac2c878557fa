//! List-view projections: encrypted cache artifacts plus per-aggregate
//! snapshots.
//!
//! Each list projection folds its aggregate type's events into full
//! states, persists a per-aggregate snapshot under that aggregate's DEK,
//! and the whole list as one cache artifact under the projection's own
//! key. Reads go through a shared handle that returns `None` while the
//! projection is rebuilding.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::warn;

use mo_core::{binding, AggregateId, AggregateType, EffectiveCursor, EventRecord, ProjectionOrdering};
use mo_crypto::SymmetricKey;
use mo_events::CommittedEvent;
use mo_store::{CacheArtifactRecord, ProjectionCacheStore};

use crate::error::{RuntimeError, RuntimeResult};
use crate::keys::ProjectionKeyProvider;
use crate::projection::{Applied, Bootstrap, Projection};
use crate::snapshots::SnapshotManager;
use crate::state::{apply_goal_event, apply_project_event, GoalState, ProjectState};

/// Cache artifact format version, bound into the AAD.
const CACHE_VERSION: u64 = 1;

const SCOPE_ALL: &str = "all";

/// Read handle over a list projection's materialized view.
#[derive(Debug, Clone)]
pub struct ListReadHandle<T> {
    shared: Arc<RwLock<Option<Vec<T>>>>,
    changed: watch::Receiver<u64>,
}

impl<T: Clone> ListReadHandle<T> {
    /// The current list, or `None` while the projection rebuilds.
    pub fn read(&self) -> Option<Vec<T>> {
        self.shared.read().expect("list view lock").clone()
    }

    /// Resolves on the next persisted change.
    pub async fn changed(&mut self) {
        let _ = self.changed.changed().await;
    }
}

macro_rules! list_projection {
    (
        $(#[$doc:meta])*
        $name:ident,
        $state:ty,
        $apply:ident,
        $aggregate_type:expr,
        $projection_id:literal
    ) => {
        $(#[$doc])*
        pub struct $name {
            states: BTreeMap<AggregateId, $state>,
            dirty: BTreeMap<AggregateId, SymmetricKey>,
            shared: Arc<RwLock<Option<Vec<$state>>>>,
            caches: ProjectionCacheStore,
            snapshots: SnapshotManager,
            keys: ProjectionKeyProvider,
            changed: watch::Sender<u64>,
        }

        impl $name {
            pub fn new(
                caches: ProjectionCacheStore,
                snapshots: SnapshotManager,
                keys: ProjectionKeyProvider,
            ) -> Self {
                let (changed, _) = watch::channel(0);
                Self {
                    states: BTreeMap::new(),
                    dirty: BTreeMap::new(),
                    shared: Arc::new(RwLock::new(None)),
                    caches,
                    snapshots,
                    keys,
                    changed,
                }
            }

            pub fn read_handle(&self) -> ListReadHandle<$state> {
                ListReadHandle {
                    shared: self.shared.clone(),
                    changed: self.changed.subscribe(),
                }
            }

            fn view(&self) -> Vec<$state> {
                self.states.values().cloned().collect()
            }

            fn publish_view(&self) {
                *self.shared.write().expect("list view lock") = Some(self.view());
                self.changed.send_modify(|v| *v += 1);
            }
        }

        #[async_trait]
        impl Projection for $name {
            fn projection_id(&self) -> &str {
                $projection_id
            }

            fn ordering(&self) -> ProjectionOrdering {
                ProjectionOrdering::EffectiveTotalOrder
            }

            fn aggregate_type(&self) -> AggregateType {
                $aggregate_type
            }

            async fn bootstrap(&mut self) -> RuntimeResult<Bootstrap> {
                let Some(record) = self.caches.get($projection_id, SCOPE_ALL).await? else {
                    return Ok(Bootstrap::NeedsRebuild);
                };

                let key = self.keys.get_or_create($projection_id).await?;
                let aad = binding::artifact_aad(
                    $projection_id,
                    SCOPE_ALL,
                    record.cache_version,
                    record.cursor,
                );

                let plain = match mo_crypto::decrypt(&record.cache_encrypted, &key, &aad) {
                    Ok(plain) => plain,
                    Err(mo_crypto::CryptoError::Decryption) => {
                        warn!(
                            projection = $projection_id,
                            "cache artifact failed authentication, rebuilding"
                        );
                        self.caches.delete_for_projection($projection_id).await?;
                        return Ok(Bootstrap::NeedsRebuild);
                    }
                    Err(e) => return Err(e.into()),
                };

                let list: Vec<$state> = serde_json::from_slice(&plain)
                    .map_err(|e| RuntimeError::Serialization(e.to_string()))?;
                self.states = list
                    .into_iter()
                    .map(|s| (s.aggregate_id.clone(), s))
                    .collect();
                self.publish_view();
                Ok(Bootstrap::Ready)
            }

            async fn apply_event(
                &mut self,
                record: &EventRecord,
                decoded: &CommittedEvent,
                dek: &SymmetricKey,
            ) -> RuntimeResult<Applied> {
                let mut slot = self.states.remove(&record.aggregate_id);
                let applied = $apply(&mut slot, &record.aggregate_id, record.version, &decoded.event);
                if let Some(state) = slot {
                    self.states.insert(record.aggregate_id.clone(), state);
                }

                if applied {
                    self.dirty.insert(record.aggregate_id.clone(), dek.clone());
                }
                Ok(Applied { changed: applied })
            }

            async fn persist(
                &mut self,
                cursor: EffectiveCursor,
                last_commit_sequence: i64,
            ) -> RuntimeResult<()> {
                // Per-aggregate snapshots for everything this batch touched.
                let dirty = std::mem::take(&mut self.dirty);
                for (aggregate_id, dek) in dirty {
                    if let Some(state) = self.states.get(&aggregate_id) {
                        self.snapshots
                            .save(
                                $aggregate_type,
                                &aggregate_id,
                                state.version,
                                state,
                                &dek,
                                cursor,
                            )
                            .await?;
                    }
                }

                // The whole list as one cache artifact.
                let plain = serde_json::to_vec(&self.view())
                    .map_err(|e| RuntimeError::Serialization(e.to_string()))?;
                let key = self.keys.get_or_create($projection_id).await?;
                let aad = binding::artifact_aad($projection_id, SCOPE_ALL, CACHE_VERSION, cursor);
                let sealed = mo_crypto::encrypt(&plain, &key, &aad)?;

                self.caches
                    .upsert(&CacheArtifactRecord {
                        projection_id: $projection_id.to_string(),
                        scope_key: SCOPE_ALL.to_string(),
                        cache_version: CACHE_VERSION,
                        cache_encrypted: sealed,
                        ordering: ProjectionOrdering::EffectiveTotalOrder,
                        cursor,
                        last_commit_sequence,
                        written_at: Utc::now(),
                    })
                    .await?;

                self.publish_view();
                Ok(())
            }

            async fn reset(&mut self) -> RuntimeResult<()> {
                self.states.clear();
                self.dirty.clear();
                *self.shared.write().expect("list view lock") = None;
                self.caches.delete_for_projection($projection_id).await?;
                self.snapshots.delete_for_type($aggregate_type).await?;
                Ok(())
            }
        }
    };
}

list_projection!(
    /// Materializes every goal into an encrypted list view.
    GoalListProjection,
    GoalState,
    apply_goal_event,
    AggregateType::Goal,
    "goal_list"
);

list_projection!(
    /// Materializes every project into an encrypted list view.
    ProjectListProjection,
    ProjectState,
    apply_project_event,
    AggregateType::Project,
    "project_list"
);

//! Infix-capable search index, persisted as an encrypted artifact.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use mo_core::{binding, AggregateType, EffectiveCursor, EventRecord, ProjectionOrdering};
use mo_crypto::SymmetricKey;
use mo_events::{CommittedEvent, DomainEvent};
use mo_store::{IndexArtifactRecord, IndexArtifactStore};

use crate::error::{RuntimeError, RuntimeResult};
use crate::keys::ProjectionKeyProvider;
use crate::projection::{Applied, Bootstrap, Projection};

/// Serialized artifact format version, bound into the AAD.
const ARTIFACT_VERSION: u64 = 1;

const SCOPE_ALL: &str = "all";

/// In-memory trigram index over document titles.
///
/// Infix matching: a query matches when every trigram of the query appears
/// in a document, confirmed by a substring check against the stored text
/// (trigram intersection alone can produce false positives). Queries
/// shorter than one trigram fall back to a linear substring scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrigramIndex {
    docs: BTreeMap<String, String>,
    grams: BTreeMap<String, BTreeSet<String>>,
}

impl TrigramIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn insert(&mut self, doc_id: &str, text: &str) {
        self.remove(doc_id);

        let normalized = text.to_lowercase();
        for gram in trigrams(&normalized) {
            self.grams
                .entry(gram)
                .or_default()
                .insert(doc_id.to_string());
        }
        self.docs.insert(doc_id.to_string(), normalized);
    }

    pub fn remove(&mut self, doc_id: &str) {
        if self.docs.remove(doc_id).is_none() {
            return;
        }
        self.grams.retain(|_, ids| {
            ids.remove(doc_id);
            !ids.is_empty()
        });
    }

    /// Documents whose text contains `query` as an infix.
    pub fn search(&self, query: &str) -> Vec<String> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let grams: Vec<String> = trigrams(&needle).collect();
        if grams.is_empty() {
            // Too short for trigrams: linear scan.
            return self
                .docs
                .iter()
                .filter(|(_, text)| text.contains(&needle))
                .map(|(id, _)| id.clone())
                .collect();
        }

        let mut candidates: Option<BTreeSet<String>> = None;
        for gram in &grams {
            let Some(ids) = self.grams.get(gram) else {
                return Vec::new();
            };
            candidates = Some(match candidates {
                None => ids.clone(),
                Some(current) => current.intersection(ids).cloned().collect(),
            });
        }

        candidates
            .unwrap_or_default()
            .into_iter()
            .filter(|id| {
                self.docs
                    .get(id)
                    .is_some_and(|text| text.contains(&needle))
            })
            .collect()
    }
}

fn trigrams(text: &str) -> impl Iterator<Item = String> + '_ {
    let chars: Vec<char> = text.chars().collect();
    (0..chars.len().saturating_sub(2)).map(move |i| chars[i..i + 3].iter().collect())
}

/// Read handle onto a search projection's live index.
#[derive(Debug, Clone)]
pub struct SearchReadHandle {
    index: Arc<RwLock<TrigramIndex>>,
    changed: watch::Receiver<u64>,
}

impl SearchReadHandle {
    pub fn search(&self, query: &str) -> Vec<String> {
        self.index.read().expect("search index lock").search(query)
    }

    /// Resolves on the next persisted change.
    pub async fn changed(&mut self) {
        let _ = self.changed.changed().await;
    }
}

/// Projection maintaining one aggregate type's encrypted search index.
///
/// The index key lives in the aggregate key store under the type's
/// reserved search id, so every device derives the same artifact key from
/// its master key hierarchy.
pub struct SearchIndexProjection {
    aggregate_type: AggregateType,
    index: Arc<RwLock<TrigramIndex>>,
    artifacts: IndexArtifactStore,
    keys: ProjectionKeyProvider,
    changed: watch::Sender<u64>,
}

impl SearchIndexProjection {
    pub fn new(
        aggregate_type: AggregateType,
        artifacts: IndexArtifactStore,
        keys: ProjectionKeyProvider,
    ) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            aggregate_type,
            index: Arc::new(RwLock::new(TrigramIndex::new())),
            artifacts,
            keys,
            changed,
        }
    }

    pub fn read_handle(&self) -> SearchReadHandle {
        SearchReadHandle {
            index: self.index.clone(),
            changed: self.changed.subscribe(),
        }
    }

    fn index_id(&self) -> &'static str {
        self.aggregate_type.search_key_id()
    }

    /// Searchable text of an event, if it affects the index.
    fn searchable_text(event: &DomainEvent) -> Option<Option<String>> {
        // Outer None: irrelevant event. Inner None: document removal.
        match event {
            DomainEvent::GoalCreated(p) => Some(Some(p.title.clone())),
            DomainEvent::GoalRenamed(p) => Some(Some(p.title.clone())),
            DomainEvent::GoalArchived(_) => Some(None),
            DomainEvent::ProjectCreated(p) => Some(Some(p.name.clone())),
            DomainEvent::ProjectRenamed(p) => Some(Some(p.name.clone())),
            DomainEvent::ProjectArchived(_) => Some(None),
            _ => None,
        }
    }
}

#[async_trait]
impl Projection for SearchIndexProjection {
    fn projection_id(&self) -> &str {
        self.index_id()
    }

    fn ordering(&self) -> ProjectionOrdering {
        ProjectionOrdering::EffectiveTotalOrder
    }

    fn aggregate_type(&self) -> AggregateType {
        self.aggregate_type
    }

    async fn bootstrap(&mut self) -> RuntimeResult<Bootstrap> {
        let Some(record) = self.artifacts.get(self.index_id(), SCOPE_ALL).await? else {
            return Ok(Bootstrap::NeedsRebuild);
        };

        let key = self.keys.get_or_create(self.index_id()).await?;
        let aad = binding::artifact_aad(
            self.index_id(),
            SCOPE_ALL,
            record.artifact_version,
            record.cursor,
        );

        let plain = match mo_crypto::decrypt(&record.artifact_encrypted, &key, &aad) {
            Ok(plain) => plain,
            Err(mo_crypto::CryptoError::Decryption) => {
                warn!(index = self.index_id(), "search artifact failed authentication, rebuilding");
                self.artifacts.delete_for_index(self.index_id()).await?;
                return Ok(Bootstrap::NeedsRebuild);
            }
            Err(e) => return Err(e.into()),
        };

        let index: TrigramIndex = serde_json::from_slice(&plain)
            .map_err(|e| RuntimeError::Serialization(e.to_string()))?;
        *self.index.write().expect("search index lock") = index;
        Ok(Bootstrap::Ready)
    }

    async fn apply_event(
        &mut self,
        record: &EventRecord,
        decoded: &CommittedEvent,
        _dek: &SymmetricKey,
    ) -> RuntimeResult<Applied> {
        let Some(change) = Self::searchable_text(&decoded.event) else {
            return Ok(Applied { changed: false });
        };

        let mut index = self.index.write().expect("search index lock");
        match change {
            Some(text) => index.insert(record.aggregate_id.as_str(), &text),
            None => index.remove(record.aggregate_id.as_str()),
        }
        Ok(Applied { changed: true })
    }

    async fn persist(
        &mut self,
        cursor: EffectiveCursor,
        _last_commit_sequence: i64,
    ) -> RuntimeResult<()> {
        let plain = {
            let index = self.index.read().expect("search index lock");
            serde_json::to_vec(&*index).map_err(|e| RuntimeError::Serialization(e.to_string()))?
        };

        let key = self.keys.get_or_create(self.index_id()).await?;
        let aad = binding::artifact_aad(self.index_id(), SCOPE_ALL, ARTIFACT_VERSION, cursor);
        let sealed = mo_crypto::encrypt(&plain, &key, &aad)?;

        self.artifacts
            .upsert(&IndexArtifactRecord {
                index_id: self.index_id().to_string(),
                scope_key: SCOPE_ALL.to_string(),
                artifact_version: ARTIFACT_VERSION,
                artifact_encrypted: sealed,
                cursor,
                written_at: Utc::now(),
            })
            .await?;

        self.changed.send_modify(|v| *v += 1);
        Ok(())
    }

    async fn reset(&mut self) -> RuntimeResult<()> {
        *self.index.write().expect("search index lock") = TrigramIndex::new();
        self.artifacts.delete_for_index(self.index_id()).await?;
        Ok(())
    }
}

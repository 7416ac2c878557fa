//! Keyring manager: create, distribute, ingest, and cache per-epoch DEKs.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use mo_core::{AggregateId, EventRecord};
use mo_crypto::SymmetricKey;

use crate::error::{KeyringError, KeyringResult};
use crate::master::MasterKeyHolder;
use crate::state::{Keyring, KeyringEpoch, RecipientEnvelope};
use crate::stores::{AggregateKeyStore, KeyringStateStore};

/// A keyring state ready for in-band distribution.
///
/// The bytes go into the `keyring_update` column of the next appended
/// event for this aggregate.
#[derive(Debug, Clone)]
pub struct KeyringUpdate {
    pub epoch: u32,
    pub keyring_update: Vec<u8>,
}

/// Manages the per-aggregate, per-epoch key hierarchy.
///
/// Cheap to clone; clones share the epoch-key cache. Safe under the
/// engine's serialized callers (projection runtime and publisher are each
/// single-writer).
#[derive(Debug, Clone)]
pub struct KeyringManager {
    master: MasterKeyHolder,
    keys: AggregateKeyStore,
    states: KeyringStateStore,
    cache: Arc<RwLock<HashMap<(AggregateId, u32), SymmetricKey>>>,
}

impl KeyringManager {
    pub fn new(
        master: MasterKeyHolder,
        keys: AggregateKeyStore,
        states: KeyringStateStore,
    ) -> Self {
        Self {
            master,
            keys,
            states,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The owner key wraps DEK envelopes for this device's own use.
    fn owner_key(&self, aggregate_id: &AggregateId) -> KeyringResult<SymmetricKey> {
        let master = self.master.get()?;
        Ok(mo_crypto::derive_key(
            &master,
            &format!("keyring:{aggregate_id}"),
        ))
    }

    fn cache_insert(&self, aggregate_id: &AggregateId, epoch: u32, dek: &SymmetricKey) {
        // Insert a copy so later external mutation of the caller's key
        // cannot reach the cache.
        self.cache
            .write()
            .expect("keyring cache lock")
            .insert((aggregate_id.clone(), epoch), dek.clone());
    }

    fn cache_get(&self, aggregate_id: &AggregateId, epoch: u32) -> Option<SymmetricKey> {
        self.cache
            .read()
            .expect("keyring cache lock")
            .get(&(aggregate_id.clone(), epoch))
            .cloned()
    }

    /// Create the epoch-0 keyring for an aggregate.
    ///
    /// Returns `None` when a keyring already exists (idempotent no-op),
    /// otherwise the update bytes to carry on the aggregate's first event.
    pub async fn create_initial_update(
        &self,
        aggregate_id: &AggregateId,
        dek: &SymmetricKey,
        created_at: DateTime<Utc>,
    ) -> KeyringResult<Option<KeyringUpdate>> {
        if self.states.get(aggregate_id).await?.is_some() {
            debug!(%aggregate_id, "keyring already exists, skipping initial update");
            return Ok(None);
        }

        let owner_key = self.owner_key(aggregate_id)?;
        let keyring = Keyring {
            aggregate_id: aggregate_id.clone(),
            current_epoch: 0,
            epochs: vec![KeyringEpoch {
                epoch_id: 0,
                created_at,
                owner_envelope: mo_crypto::encrypt(dek.as_bytes(), &owner_key, &[])?,
                recipient_envelopes: vec![],
            }],
        };

        self.states.put(&keyring).await?;
        self.keys.put(aggregate_id, dek).await?;
        self.cache_insert(aggregate_id, 0, dek);

        Ok(Some(KeyringUpdate {
            epoch: 0,
            keyring_update: self.seal_keyring(&keyring, &owner_key)?,
        }))
    }

    /// Rotate the aggregate to a fresh epoch.
    ///
    /// Appends `current_epoch + 1` with the new DEK and re-emits update
    /// bytes for distribution on the next event.
    pub async fn rotate_epoch(
        &self,
        aggregate_id: &AggregateId,
        new_dek: &SymmetricKey,
        created_at: DateTime<Utc>,
    ) -> KeyringResult<KeyringUpdate> {
        let mut keyring = self
            .states
            .get(aggregate_id)
            .await?
            .ok_or_else(|| KeyringError::KeyringNotFound(aggregate_id.clone()))?;

        let owner_key = self.owner_key(aggregate_id)?;
        let next_epoch = keyring.current_epoch + 1;

        keyring.epochs.push(KeyringEpoch {
            epoch_id: next_epoch,
            created_at,
            owner_envelope: mo_crypto::encrypt(new_dek.as_bytes(), &owner_key, &[])?,
            recipient_envelopes: vec![],
        });
        keyring.current_epoch = next_epoch;

        self.states.put(&keyring).await?;
        self.keys.put(aggregate_id, new_dek).await?;
        self.cache_insert(aggregate_id, next_epoch, new_dek);

        Ok(KeyringUpdate {
            epoch: next_epoch,
            keyring_update: self.seal_keyring(&keyring, &owner_key)?,
        })
    }

    /// Wrap the current DEK for a recipient public key and record the
    /// envelope on the current epoch.
    pub async fn add_recipient(
        &self,
        aggregate_id: &AggregateId,
        recipient_id: &str,
        recipient_public_sec1: &[u8],
    ) -> KeyringResult<KeyringUpdate> {
        let mut keyring = self
            .states
            .get(aggregate_id)
            .await?
            .ok_or_else(|| KeyringError::KeyringNotFound(aggregate_id.clone()))?;

        let current = keyring.current_epoch;
        let dek = self.resolve_key_for_epoch(aggregate_id, current).await?;
        let envelope = mo_crypto::wrap_key(dek.as_bytes(), recipient_public_sec1)?;

        let epoch = keyring
            .epoch_mut(current)
            .ok_or_else(|| KeyringError::MissingKey {
                aggregate_id: aggregate_id.clone(),
                epoch: current,
            })?;
        epoch.recipient_envelopes.retain(|e| e.recipient_id != recipient_id);
        epoch.recipient_envelopes.push(RecipientEnvelope {
            recipient_id: recipient_id.to_string(),
            envelope,
        });

        let owner_key = self.owner_key(aggregate_id)?;
        self.states.put(&keyring).await?;

        Ok(KeyringUpdate {
            epoch: current,
            keyring_update: self.seal_keyring(&keyring, &owner_key)?,
        })
    }

    /// Ingest a keyring update that arrived in-band on an event.
    ///
    /// Verifies the embedded aggregate id, persists the state, caches every
    /// epoch's DEK, and saves the current epoch's DEK to the aggregate key
    /// store.
    pub async fn ingest_keyring_update(
        &self,
        aggregate_id: &AggregateId,
        update_bytes: &[u8],
    ) -> KeyringResult<Keyring> {
        let owner_key = self.owner_key(aggregate_id)?;
        let plain = mo_crypto::decrypt(update_bytes, &owner_key, &[])?;

        let keyring: Keyring = serde_json::from_slice(&plain)
            .map_err(|e| KeyringError::Serialization(e.to_string()))?;

        if keyring.aggregate_id != *aggregate_id {
            return Err(KeyringError::AggregateMismatch {
                expected: aggregate_id.clone(),
                found: keyring.aggregate_id,
            });
        }

        self.states.put(&keyring).await?;

        let mut current_dek = None;
        for epoch in &keyring.epochs {
            let dek_bytes = mo_crypto::decrypt(&epoch.owner_envelope, &owner_key, &[])?;
            let dek = SymmetricKey::from_bytes(&dek_bytes)?;
            if epoch.epoch_id == keyring.current_epoch {
                current_dek = Some(dek.clone());
            }
            self.cache_insert(aggregate_id, epoch.epoch_id, &dek);
        }

        if let Some(dek) = current_dek {
            self.keys.put(aggregate_id, &dek).await?;
        } else {
            warn!(%aggregate_id, current_epoch = keyring.current_epoch,
                "ingested keyring has no envelope for its current epoch");
        }

        debug!(%aggregate_id, epochs = keyring.epochs.len(), "ingested keyring update");
        Ok(keyring)
    }

    /// Resolve the DEK for an event, ingesting any in-band keyring update
    /// first.
    pub async fn resolve_key_for_event(&self, event: &EventRecord) -> KeyringResult<SymmetricKey> {
        if let Some(update) = &event.keyring_update {
            self.ingest_keyring_update(&event.aggregate_id, update).await?;
        }
        self.resolve_key_for_epoch(&event.aggregate_id, event.effective_epoch())
            .await
    }

    /// Resolve the DEK for `(aggregate_id, epoch)` without an event context.
    pub async fn resolve_key_for_epoch(
        &self,
        aggregate_id: &AggregateId,
        epoch: u32,
    ) -> KeyringResult<SymmetricKey> {
        if let Some(dek) = self.cache_get(aggregate_id, epoch) {
            return Ok(dek);
        }

        match self.states.get(aggregate_id).await? {
            Some(keyring) => {
                let entry = keyring.epoch(epoch).ok_or_else(|| KeyringError::MissingKey {
                    aggregate_id: aggregate_id.clone(),
                    epoch,
                })?;

                let owner_key = self.owner_key(aggregate_id)?;
                let dek_bytes = mo_crypto::decrypt(&entry.owner_envelope, &owner_key, &[])?;
                let dek = SymmetricKey::from_bytes(&dek_bytes)?;
                self.cache_insert(aggregate_id, epoch, &dek);
                Ok(dek)
            }
            // Aggregates that predate the keyring protocol have a bare DEK
            // in the aggregate key store and implicitly live at epoch 0.
            None if epoch == 0 => match self.keys.get(aggregate_id).await? {
                Some(dek) => {
                    self.cache_insert(aggregate_id, 0, &dek);
                    Ok(dek)
                }
                None => Err(KeyringError::MissingKey {
                    aggregate_id: aggregate_id.clone(),
                    epoch,
                }),
            },
            None => Err(KeyringError::MissingKey {
                aggregate_id: aggregate_id.clone(),
                epoch,
            }),
        }
    }

    /// Current epoch of an aggregate's keyring, if one exists.
    pub async fn get_current_epoch(&self, aggregate_id: &AggregateId) -> KeyringResult<Option<u32>> {
        Ok(self
            .states
            .get(aggregate_id)
            .await?
            .map(|k| k.current_epoch))
    }

    /// Read accessor for the stored keyring state.
    pub async fn get_keyring(&self, aggregate_id: &AggregateId) -> KeyringResult<Option<Keyring>> {
        self.states.get(aggregate_id).await
    }

    fn seal_keyring(&self, keyring: &Keyring, owner_key: &SymmetricKey) -> KeyringResult<Vec<u8>> {
        let json = serde_json::to_vec(keyring)
            .map_err(|e| KeyringError::Serialization(e.to_string()))?;
        Ok(mo_crypto::encrypt(&json, owner_key, &[])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mo_core::AggregateType;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use uuid::Uuid;

    use crate::stores::init_keyring_schema;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_keyring_schema(&pool).await.unwrap();
        pool
    }

    /// A "device": its own stores, possibly sharing a master key.
    async fn device(master: &MasterKeyHolder) -> KeyringManager {
        let pool = test_pool().await;
        KeyringManager::new(
            master.clone(),
            AggregateKeyStore::new(pool.clone(), master.clone()),
            KeyringStateStore::new(pool),
        )
    }

    fn event(
        aggregate_id: &str,
        epoch: Option<u32>,
        keyring_update: Option<Vec<u8>>,
    ) -> EventRecord {
        EventRecord {
            id: Uuid::now_v7(),
            aggregate_type: AggregateType::Goal,
            aggregate_id: AggregateId::new(aggregate_id),
            event_type: "goal.created".to_string(),
            payload_encrypted: vec![0; 32],
            keyring_update,
            version: 1,
            occurred_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            actor_id: None,
            causation_id: None,
            correlation_id: None,
            epoch,
            commit_sequence: 1,
            global_sequence: None,
        }
    }

    #[tokio::test]
    async fn create_and_resolve_across_devices() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());

        let device_x = device(&master).await;
        let device_y = device(&master).await;

        let id = AggregateId::new("goal-abc");
        let dek = SymmetricKey::generate();
        let t = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

        let update = device_x
            .create_initial_update(&id, &dek, t)
            .await
            .unwrap()
            .expect("first call creates the keyring");
        assert_eq!(update.epoch, 0);

        // Device Y has empty stores and learns the DEK from the in-band
        // update alone.
        let ev = event("goal-abc", None, Some(update.keyring_update));
        let resolved = device_y.resolve_key_for_event(&ev).await.unwrap();
        assert_eq!(resolved, dek);

        // Y's aggregate key store now holds the DEK.
        assert_eq!(device_y.keys.get(&id).await.unwrap().unwrap(), dek);
    }

    #[tokio::test]
    async fn create_initial_update_is_idempotent() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());
        let manager = device(&master).await;

        let id = AggregateId::new("goal-abc");
        let dek = SymmetricKey::generate();
        let t = Utc::now();

        assert!(manager
            .create_initial_update(&id, &dek, t)
            .await
            .unwrap()
            .is_some());
        assert!(manager
            .create_initial_update(&id, &dek, t)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn multi_epoch_resolution() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());

        let device_x = device(&master).await;
        let device_y = device(&master).await;

        let id = AggregateId::new("goal-abc");
        let dek_v0 = SymmetricKey::generate();
        let dek_v1 = SymmetricKey::generate();
        let t = Utc::now();

        device_x
            .create_initial_update(&id, &dek_v0, t)
            .await
            .unwrap()
            .unwrap();
        let rotated = device_x.rotate_epoch(&id, &dek_v1, t).await.unwrap();
        assert_eq!(rotated.epoch, 1);

        // Event at epoch 1 carries the rotated keyring; a later read at
        // epoch 0 needs no update.
        let ev1 = event("goal-abc", Some(1), Some(rotated.keyring_update));
        let ev0 = event("goal-abc", Some(0), None);

        assert_eq!(device_y.resolve_key_for_event(&ev1).await.unwrap(), dek_v1);
        assert_eq!(device_y.resolve_key_for_event(&ev0).await.unwrap(), dek_v0);

        assert_eq!(device_y.keys.get(&id).await.unwrap().unwrap(), dek_v1);
        assert_eq!(device_y.get_current_epoch(&id).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn tampered_aggregate_id_is_rejected() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());

        let device_x = device(&master).await;
        let device_y = device(&master).await;

        let id = AggregateId::new("goal-abc");
        let dek = SymmetricKey::generate();
        let update = device_x
            .create_initial_update(&id, &dek, Utc::now())
            .await
            .unwrap()
            .unwrap();

        // Decode the update, retarget it, and re-encrypt under the same
        // owner key: the mismatch check must still fire.
        let owner_key = device_x.owner_key(&id).unwrap();
        let plain = mo_crypto::decrypt(&update.keyring_update, &owner_key, &[]).unwrap();
        let mut keyring: Keyring = serde_json::from_slice(&plain).unwrap();
        keyring.aggregate_id = AggregateId::new("goal-other");
        let forged =
            mo_crypto::encrypt(&serde_json::to_vec(&keyring).unwrap(), &owner_key, &[]).unwrap();

        let ev = event("goal-abc", None, Some(forged));
        let err = device_y.resolve_key_for_event(&ev).await.unwrap_err();
        assert!(matches!(err, KeyringError::AggregateMismatch { .. }));
    }

    #[tokio::test]
    async fn missing_epoch_is_missing_key() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());
        let manager = device(&master).await;

        let id = AggregateId::new("goal-abc");
        manager
            .create_initial_update(&id, &SymmetricKey::generate(), Utc::now())
            .await
            .unwrap();

        let err = manager.resolve_key_for_epoch(&id, 5).await.unwrap_err();
        assert!(matches!(err, KeyringError::MissingKey { epoch: 5, .. }));
    }

    #[tokio::test]
    async fn legacy_fallback_reads_aggregate_key_store_at_epoch_zero() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());
        let manager = device(&master).await;

        let id = AggregateId::new("goal-legacy");
        let dek = SymmetricKey::generate();
        manager.keys.put(&id, &dek).await.unwrap();

        // No keyring row: epoch 0 falls back, anything else is missing.
        assert_eq!(manager.resolve_key_for_epoch(&id, 0).await.unwrap(), dek);
        assert!(matches!(
            manager.resolve_key_for_epoch(&id, 1).await.unwrap_err(),
            KeyringError::MissingKey { .. }
        ));
    }

    #[tokio::test]
    async fn master_key_absence_is_a_deferral() {
        let master = MasterKeyHolder::new();
        let manager = device(&master).await;

        let ev = event("goal-abc", None, None);
        assert!(matches!(
            manager.resolve_key_for_event(&ev).await.unwrap_err(),
            KeyringError::MasterKeyNotSet
        ));
    }

    #[tokio::test]
    async fn recipient_envelope_unwraps_with_recipient_private_key() {
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());
        let manager = device(&master).await;

        let id = AggregateId::new("goal-abc");
        let dek = SymmetricKey::generate();
        manager
            .create_initial_update(&id, &dek, Utc::now())
            .await
            .unwrap();

        let recipient = mo_crypto::generate_encryption_keypair().unwrap();
        manager
            .add_recipient(&id, "device-y", &recipient.public)
            .await
            .unwrap();

        let keyring = manager.get_keyring(&id).await.unwrap().unwrap();
        let envelope = &keyring.epoch(0).unwrap().recipient_envelopes[0];
        assert_eq!(envelope.recipient_id, "device-y");

        let unwrapped = mo_crypto::unwrap_key(&envelope.envelope, &recipient.private).unwrap();
        assert_eq!(unwrapped, dek.to_vec());
    }
}

//! SQLite-backed key stores.
//!
//! Two small tables owned by this crate: `aggregate_keys` (DEKs encrypted
//! at rest under the master key) and `keyring_states` (keyring JSON,
//! stored verbatim). Both expose plain get/put on opaque values.

use chrono::Utc;
use mo_core::AggregateId;
use sqlx::{Row, SqlitePool};

use crate::error::{KeyringError, KeyringResult};
use crate::master::MasterKeyHolder;
use crate::state::Keyring;
use mo_crypto::SymmetricKey;

/// Create the key-store tables if they do not exist.
pub async fn init_keyring_schema(pool: &SqlitePool) -> KeyringResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregate_keys (
            aggregate_id  TEXT PRIMARY KEY,
            key_encrypted BLOB NOT NULL,
            updated_at    TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(KeyringError::persistence)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keyring_states (
            aggregate_id  TEXT PRIMARY KEY,
            state_json    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(KeyringError::persistence)?;

    Ok(())
}

/// `aggregate_id → DEK`, encrypted at rest under the master key.
///
/// Callers see plaintext DEKs; the ciphertext shape never leaves this
/// store. The row is AAD-bound to its aggregate id so ciphertext cannot be
/// moved between rows.
#[derive(Debug, Clone)]
pub struct AggregateKeyStore {
    pool: SqlitePool,
    master: MasterKeyHolder,
}

impl AggregateKeyStore {
    pub fn new(pool: SqlitePool, master: MasterKeyHolder) -> Self {
        Self { pool, master }
    }

    pub async fn put(&self, aggregate_id: &AggregateId, dek: &SymmetricKey) -> KeyringResult<()> {
        let master = self.master.get()?;
        let sealed = mo_crypto::encrypt(dek.as_bytes(), &master, aggregate_id.as_str().as_bytes())?;

        sqlx::query(
            r#"
            INSERT INTO aggregate_keys (aggregate_id, key_encrypted, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (aggregate_id)
            DO UPDATE SET key_encrypted = excluded.key_encrypted,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(aggregate_id.as_str())
        .bind(sealed)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(KeyringError::persistence)?;

        Ok(())
    }

    pub async fn get(&self, aggregate_id: &AggregateId) -> KeyringResult<Option<SymmetricKey>> {
        let row = sqlx::query(
            r#"SELECT key_encrypted FROM aggregate_keys WHERE aggregate_id = ?1"#,
        )
        .bind(aggregate_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(KeyringError::persistence)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let sealed: Vec<u8> = row
            .try_get("key_encrypted")
            .map_err(KeyringError::persistence)?;

        let master = self.master.get()?;
        let plain = mo_crypto::decrypt(&sealed, &master, aggregate_id.as_str().as_bytes())?;
        Ok(Some(SymmetricKey::from_bytes(&plain)?))
    }

    pub async fn delete(&self, aggregate_id: &AggregateId) -> KeyringResult<()> {
        sqlx::query(r#"DELETE FROM aggregate_keys WHERE aggregate_id = ?1"#)
            .bind(aggregate_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(KeyringError::persistence)?;
        Ok(())
    }
}

/// `aggregate_id → Keyring`, stored as its deterministic JSON.
#[derive(Debug, Clone)]
pub struct KeyringStateStore {
    pool: SqlitePool,
}

impl KeyringStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn put(&self, keyring: &Keyring) -> KeyringResult<()> {
        let json = serde_json::to_string(keyring)
            .map_err(|e| KeyringError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO keyring_states (aggregate_id, state_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (aggregate_id)
            DO UPDATE SET state_json = excluded.state_json,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(keyring.aggregate_id.as_str())
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(KeyringError::persistence)?;

        Ok(())
    }

    pub async fn get(&self, aggregate_id: &AggregateId) -> KeyringResult<Option<Keyring>> {
        let row = sqlx::query(
            r#"SELECT state_json FROM keyring_states WHERE aggregate_id = ?1"#,
        )
        .bind(aggregate_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(KeyringError::persistence)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let json: String = row
            .try_get("state_json")
            .map_err(KeyringError::persistence)?;

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| KeyringError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_keyring_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn aggregate_keys_are_encrypted_at_rest() {
        let pool = test_pool().await;
        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());

        let store = AggregateKeyStore::new(pool.clone(), master.clone());
        let id = AggregateId::new("goal-abc");
        let dek = SymmetricKey::generate();

        store.put(&id, &dek).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().unwrap(), dek);

        // The raw row never contains the plaintext DEK.
        let raw: Vec<u8> = sqlx::query(r#"SELECT key_encrypted FROM aggregate_keys"#)
            .fetch_one(&pool)
            .await
            .unwrap()
            .try_get("key_encrypted")
            .unwrap();
        assert!(!raw
            .windows(dek.as_bytes().len())
            .any(|w| w == dek.as_bytes()));
    }

    #[tokio::test]
    async fn key_store_requires_master_key() {
        let pool = test_pool().await;
        let master = MasterKeyHolder::new();
        let store = AggregateKeyStore::new(pool, master);

        let err = store
            .put(&AggregateId::new("goal-abc"), &SymmetricKey::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyringError::MasterKeyNotSet));
    }
}

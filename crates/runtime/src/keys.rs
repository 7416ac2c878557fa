//! Process-scoped keys for cross-aggregate artifacts.
//!
//! List views and search indexes span aggregates, so no per-aggregate DEK
//! fits. Each such artifact owner gets its own random key, kept in the
//! aggregate key store under a reserved id (`goal_search`, `goal_list`,
//! ...) and therefore encrypted at rest under the master key like any DEK.

use mo_core::AggregateId;
use mo_crypto::SymmetricKey;
use mo_keyring::AggregateKeyStore;

use crate::error::RuntimeResult;

#[derive(Debug, Clone)]
pub struct ProjectionKeyProvider {
    keys: AggregateKeyStore,
}

impl ProjectionKeyProvider {
    pub fn new(keys: AggregateKeyStore) -> Self {
        Self { keys }
    }

    /// Fetch the key under a reserved id, generating it on first use.
    pub async fn get_or_create(&self, reserved_id: &str) -> RuntimeResult<SymmetricKey> {
        let id = AggregateId::new(reserved_id);
        if let Some(key) = self.keys.get(&id).await? {
            return Ok(key);
        }

        let key = SymmetricKey::generate();
        self.keys.put(&id, &key).await?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mo_keyring::{init_keyring_schema, MasterKeyHolder};
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn key_is_created_once_and_stable() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_keyring_schema(&pool).await.unwrap();

        let master = MasterKeyHolder::new();
        master.set(SymmetricKey::generate());
        let provider = ProjectionKeyProvider::new(AggregateKeyStore::new(pool, master));

        let a = provider.get_or_create("goal_search").await.unwrap();
        let b = provider.get_or_create("goal_search").await.unwrap();
        let other = provider.get_or_create("project_search").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, other);
    }
}

//! Process-wide master key slot.

use std::sync::{Arc, RwLock};

use mo_crypto::SymmetricKey;

use crate::error::{KeyringError, KeyringResult};

/// Holds the current master key for the process.
///
/// Cheap to clone; all clones share the same slot. There are no
/// singletons: the top-level context owns one holder and passes handles
/// down.
#[derive(Debug, Clone, Default)]
pub struct MasterKeyHolder {
    slot: Arc<RwLock<Option<SymmetricKey>>>,
}

impl MasterKeyHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the master key (unlock).
    pub fn set(&self, key: SymmetricKey) {
        *self.slot.write().expect("master key lock") = Some(key);
    }

    /// Drop the master key (lock).
    pub fn clear(&self) {
        *self.slot.write().expect("master key lock") = None;
    }

    pub fn is_set(&self) -> bool {
        self.slot.read().expect("master key lock").is_some()
    }

    /// Get a copy of the master key, or `MasterKeyNotSet`.
    pub fn get(&self) -> KeyringResult<SymmetricKey> {
        self.slot
            .read()
            .expect("master key lock")
            .clone()
            .ok_or(KeyringError::MasterKeyNotSet)
    }
}

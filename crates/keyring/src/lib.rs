//! Per-aggregate key management: master key, DEK stores, keyring protocol.
//!
//! The key hierarchy is: master key (held in memory, set by the unlock
//! flow) → HKDF owner key per aggregate → per-epoch DEK envelopes inside
//! the keyring state. Keyring states travel in-band on events so other
//! devices can rebuild the hierarchy from the log alone.

pub mod error;
pub mod manager;
pub mod master;
pub mod state;
pub mod stores;

pub use error::{KeyringError, KeyringResult};
pub use manager::{KeyringManager, KeyringUpdate};
pub use master::MasterKeyHolder;
pub use state::{Keyring, KeyringEpoch, RecipientEnvelope};
pub use stores::{init_keyring_schema, AggregateKeyStore, KeyringStateStore};

//! SQLite persistence: the event log and every derived-artifact table.
//!
//! The event store is the single source of truth; all mutations go through
//! its transactional operations. Derived artifacts (snapshots, caches,
//! index artifacts, projection meta) are owned by the projection runtime
//! and only pass through here as opaque ciphertext.

pub mod artifact_store;
pub mod error;
pub mod event_store;
pub mod idempotency;
pub mod meta_store;
pub mod notify;
pub mod schema;
pub mod snapshot_store;

pub use artifact_store::{
    CacheArtifactRecord, IndexArtifactRecord, IndexArtifactStore, ProjectionCacheStore,
};
pub use error::{StoreError, StoreResult};
pub use event_store::{EventFilter, RemoteEventRow, SqliteEventStore, VersionShift};
pub use idempotency::IdempotencyStore;
pub use meta_store::{ProjectionMetaRecord, ProjectionMetaStore};
pub use notify::{ChangeNotifier, StoreTable};
pub use schema::init_store_schema;
pub use snapshot_store::{SnapshotRecord, SnapshotStore};

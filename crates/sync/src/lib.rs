//! Sync integration hooks: remote materialization and pending rewrites.
//!
//! The network transport is not here. It hands this crate pulled records
//! (`materialize_remote_event`) and conflict notifications
//! (`rewrite_pending_versions`); decryption, validation, and the
//! transactional row writes happen on this side of the boundary.

pub mod error;
pub mod materializer;
pub mod record;
pub mod rewriter;

pub use error::{SyncError, SyncResult};
pub use materializer::RemoteMaterializer;
pub use record::RemoteEventRecord;
pub use rewriter::{PendingVersionRewriter, RewriteOutcome};

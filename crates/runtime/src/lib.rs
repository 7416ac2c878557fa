//! Projection runtime, committed-event publisher, and read models.
//!
//! Consumes the encrypted event log in its effective total order,
//! maintains encrypted snapshots / cache artifacts / search indexes, and
//! re-publishes decoded domain events to in-process subscribers. All
//! processing is single-writer per consumer via [`TaskRunner`].

pub mod error;
pub mod keys;
pub mod list_view;
pub mod projection;
pub mod publisher;
pub mod runtime;
pub mod search;
pub mod snapshots;
pub mod state;
pub mod task_runner;


pub use error::{RuntimeError, RuntimeResult};
pub use keys::ProjectionKeyProvider;
pub use list_view::{GoalListProjection, ListReadHandle, ProjectListProjection};
pub use projection::{Applied, Bootstrap, Projection};
pub use publisher::{CommittedEventPublisher, PublisherLoopHandle};
pub use runtime::{ProjectionRuntime, RuntimeLoopHandle, TAIL_WINDOW};
pub use search::{SearchIndexProjection, SearchReadHandle, TrigramIndex};
pub use snapshots::{LoadedSnapshot, SnapshotManager};
pub use state::{apply_goal_event, apply_project_event, GoalState, ProjectState};
pub use task_runner::TaskRunner;

//! Core engine types: identifiers, persisted records, cursors, AAD bindings.
//!
//! Everything here is plain data. No I/O, no crypto, no storage assumptions;
//! the other crates in the workspace build on these shapes.

pub mod b64;
pub mod binding;
pub mod cursor;
pub mod error;
pub mod id;
pub mod record;

pub use cursor::{EffectiveCursor, ProjectionOrdering, ProjectionPhase};
pub use error::{CoreError, CoreResult};
pub use id::{AggregateId, AggregateType};
pub use record::{EventRecord, EventToAppend};

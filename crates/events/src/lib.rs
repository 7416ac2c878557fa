//! Event envelope, typed domain events, and the versioned-payload registry.
//!
//! The plaintext inside every event's ciphertext is a JSON envelope: meta
//! (identity, causality, time) plus a versioned payload. The registry maps
//! stable event-type tags to typed payloads and carries the migration
//! chain that upgrades old payload versions on decode. Encode always
//! writes the latest version.

pub mod bus;
pub mod codec;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod registry;

pub use bus::{CommittedEvent, CommittedEventBus, CommittedEventHandler, HandlerError};
pub use codec::{decode_envelope, encode_envelope};
pub use domain::{
    DomainEvent, GoalArchived, GoalCompleted, GoalCreated, GoalRenamed, GoalTargetChanged,
    ProjectArchived, ProjectCreated, ProjectRenamed, ProjectStatus, ProjectStatusChanged,
};
pub use envelope::{EventEnvelope, EventMeta, VersionedPayload, ENVELOPE_VERSION};
pub use error::{EnvelopeError, EnvelopeResult};
pub use registry::{spec_for, EventTypeSpec};

//! Envelope and registry errors.

use thiserror::Error;

pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The envelope JSON is missing fields, mistyped, or not an envelope
    /// at all.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The event type tag is not in the registry.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The payload was written by a newer schema than this build knows.
    /// Halts the batch; an operator (or an app update) must intervene.
    #[error("future payload version {version} for {event_type} (latest known: {latest})")]
    FutureVersion {
        event_type: String,
        version: u32,
        latest: u32,
    },

    /// The migration chain has a hole. Programmer error.
    #[error("missing migration step from version {from_version} for {event_type}")]
    MissingMigration {
        event_type: String,
        from_version: u32,
    },
}

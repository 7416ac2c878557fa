//! Envelope encode/decode entry points.

use crate::domain::DomainEvent;
use crate::envelope::{EventEnvelope, EventMeta, ENVELOPE_VERSION};
use crate::error::{EnvelopeError, EnvelopeResult};
use crate::registry;

/// Encode a typed event into envelope bytes (always the latest payload
/// version).
pub fn encode_envelope(meta: EventMeta, event: &DomainEvent) -> EnvelopeResult<Vec<u8>> {
    let envelope = EventEnvelope {
        envelope_version: ENVELOPE_VERSION,
        meta,
        payload: registry::encode_payload(event)?,
    };
    envelope.to_bytes()
}

/// Decode envelope bytes into meta plus a typed event.
///
/// Applies the registry migration chain; unknown event types and future
/// payload versions surface as their own errors so the caller can tell a
/// data problem from a build that is simply too old.
pub fn decode_envelope(bytes: &[u8]) -> EnvelopeResult<(EventMeta, DomainEvent)> {
    let envelope = EventEnvelope::from_bytes(bytes)?;

    let spec = registry::spec_for(&envelope.meta.event_type)
        .ok_or_else(|| EnvelopeError::UnknownEventType(envelope.meta.event_type.clone()))?;

    let event = spec.decode_payload(&envelope.payload)?;
    Ok((envelope.meta, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GoalCreated, ProjectCreated};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn meta(event_type: &str) -> EventMeta {
        EventMeta {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            occurred_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            actor_id: None,
            causation_id: Some("cmd-1".to_string()),
            correlation_id: Some("flow-1".to_string()),
        }
    }

    #[test]
    fn encode_decode_is_identity_on_well_formed_events() {
        let cases = [
            DomainEvent::GoalCreated(GoalCreated {
                title: "Learn Rust".to_string(),
                color: "amber".to_string(),
                target_date: Some(Utc.timestamp_millis_opt(1_800_000_000_000).unwrap()),
            }),
            DomainEvent::ProjectCreated(ProjectCreated {
                name: "Kitchen".to_string(),
                description: None,
            }),
        ];

        for event in cases {
            let m = meta(event.event_type());
            let bytes = encode_envelope(m.clone(), &event).unwrap();
            let (decoded_meta, decoded) = decode_envelope(&bytes).unwrap();
            assert_eq!(decoded_meta, m);
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn unknown_event_type_is_its_own_error() {
        let event = DomainEvent::GoalCreated(GoalCreated {
            title: "x".to_string(),
            color: "slate".to_string(),
            target_date: None,
        });
        let bytes = encode_envelope(meta("habit.created"), &event).unwrap();

        assert_eq!(
            decode_envelope(&bytes).unwrap_err(),
            EnvelopeError::UnknownEventType("habit.created".to_string())
        );
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        assert!(matches!(
            decode_envelope(b"not json at all").unwrap_err(),
            EnvelopeError::Malformed(_)
        ));
    }
}

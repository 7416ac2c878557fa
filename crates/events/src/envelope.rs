//! The JSON event envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{EnvelopeError, EnvelopeResult};

/// Current envelope wire version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Identity, causality, and time of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_id: Uuid,
    pub event_type: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub causation_id: Option<String>,
    pub correlation_id: Option<String>,
}

/// Schema-versioned payload; `data` is upgraded by the registry's
/// migration chain on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedPayload {
    pub payload_version: u32,
    pub data: JsonValue,
}

/// The unit of encryption: what actually lives inside `payload_encrypted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub envelope_version: u32,
    pub meta: EventMeta,
    pub payload: VersionedPayload,
}

impl EventEnvelope {
    /// Serialize to the wire shape.
    pub fn to_bytes(&self) -> EnvelopeResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Parse and structurally validate an envelope.
    ///
    /// Strict on shape: missing meta, mistyped fields, a non-positive
    /// payload version, or an unknown envelope version are all malformed.
    pub fn from_bytes(bytes: &[u8]) -> EnvelopeResult<Self> {
        let envelope: EventEnvelope =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        if envelope.envelope_version != ENVELOPE_VERSION {
            return Err(EnvelopeError::Malformed(format!(
                "unsupported envelope version {}",
                envelope.envelope_version
            )));
        }
        if envelope.payload.payload_version == 0 {
            return Err(EnvelopeError::Malformed(
                "payloadVersion must be positive".to_string(),
            ));
        }

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta() -> EventMeta {
        EventMeta {
            event_id: Uuid::now_v7(),
            event_type: "goal.created".to_string(),
            occurred_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            actor_id: Some("actor-1".to_string()),
            causation_id: None,
            correlation_id: None,
        }
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let envelope = EventEnvelope {
            envelope_version: ENVELOPE_VERSION,
            meta: meta(),
            payload: VersionedPayload {
                payload_version: 2,
                data: serde_json::json!({"title": "Learn Rust"}),
            },
        };

        let json: serde_json::Value =
            serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(json["envelopeVersion"], 1);
        assert_eq!(json["meta"]["eventType"], "goal.created");
        assert_eq!(json["meta"]["occurredAt"], 1_700_000_000_000i64);
        assert_eq!(json["payload"]["payloadVersion"], 2);
    }

    #[test]
    fn round_trip_is_identity() {
        let envelope = EventEnvelope {
            envelope_version: ENVELOPE_VERSION,
            meta: meta(),
            payload: VersionedPayload {
                payload_version: 1,
                data: serde_json::json!({"name": "Kitchen", "description": null}),
            },
        };
        let parsed = EventEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn missing_meta_is_malformed() {
        let bytes = br#"{"envelopeVersion":1,"payload":{"payloadVersion":1,"data":{}}}"#;
        assert!(matches!(
            EventEnvelope::from_bytes(bytes).unwrap_err(),
            EnvelopeError::Malformed(_)
        ));
    }

    #[test]
    fn zero_payload_version_is_malformed() {
        let envelope = EventEnvelope {
            envelope_version: ENVELOPE_VERSION,
            meta: meta(),
            payload: VersionedPayload {
                payload_version: 0,
                data: serde_json::json!({}),
            },
        };
        assert!(matches!(
            EventEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap_err(),
            EnvelopeError::Malformed(_)
        ));
    }

    #[test]
    fn unknown_envelope_version_is_malformed() {
        let envelope = EventEnvelope {
            envelope_version: 9,
            meta: meta(),
            payload: VersionedPayload {
                payload_version: 1,
                data: serde_json::json!({}),
            },
        };
        assert!(matches!(
            EventEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap_err(),
            EnvelopeError::Malformed(_)
        ));
    }
}

//! Keyring state: the per-aggregate epoch hierarchy.
//!
//! The serialized shape is the wire format carried (encrypted under the
//! owner key) in `keyring_update` fields, so it must stay deterministic:
//! serde struct order, camelCase names, base64 byte fields.

use chrono::{DateTime, Utc};
use mo_core::AggregateId;
use serde::{Deserialize, Serialize};

/// One generation of an aggregate's DEK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyringEpoch {
    pub epoch_id: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// DEK encrypted under the aggregate's owner key.
    #[serde(with = "mo_core::b64")]
    pub owner_envelope: Vec<u8>,
    /// DEK wrapped for other devices' public keys.
    #[serde(default)]
    pub recipient_envelopes: Vec<RecipientEnvelope>,
}

/// DEK wrapped for one recipient (ECIES envelope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientEnvelope {
    /// Opaque recipient identifier (device or key id).
    pub recipient_id: String,
    #[serde(with = "mo_core::b64")]
    pub envelope: Vec<u8>,
}

/// Per-aggregate key state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyring {
    pub aggregate_id: AggregateId,
    pub current_epoch: u32,
    /// Ordered by `epoch_id` ascending; epoch ids are dense from 0.
    pub epochs: Vec<KeyringEpoch>,
}

impl Keyring {
    pub fn epoch(&self, epoch_id: u32) -> Option<&KeyringEpoch> {
        self.epochs.iter().find(|e| e.epoch_id == epoch_id)
    }

    pub fn epoch_mut(&mut self, epoch_id: u32) -> Option<&mut KeyringEpoch> {
        self.epochs.iter_mut().find(|e| e.epoch_id == epoch_id)
    }

    pub fn latest_epoch(&self) -> Option<&KeyringEpoch> {
        self.epochs.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serialized_shape_is_stable() {
        let keyring = Keyring {
            aggregate_id: AggregateId::new("goal-abc"),
            current_epoch: 0,
            epochs: vec![KeyringEpoch {
                epoch_id: 0,
                created_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
                owner_envelope: vec![9, 9],
                recipient_envelopes: vec![],
            }],
        };

        let json = serde_json::to_string(&keyring).unwrap();
        assert_eq!(
            json,
            r#"{"aggregateId":"goal-abc","currentEpoch":0,"epochs":[{"epochId":0,"createdAt":1700000000000,"ownerEnvelope":"CQk=","recipientEnvelopes":[]}]}"#
        );
        assert_eq!(serde_json::from_str::<Keyring>(&json).unwrap(), keyring);
    }

    #[test]
    fn epoch_lookup() {
        let mk = |id: u32| KeyringEpoch {
            epoch_id: id,
            created_at: Utc.timestamp_millis_opt(0).unwrap(),
            owner_envelope: vec![],
            recipient_envelopes: vec![],
        };
        let keyring = Keyring {
            aggregate_id: AggregateId::new("goal-abc"),
            current_epoch: 1,
            epochs: vec![mk(0), mk(1)],
        };

        assert_eq!(keyring.epoch(1).unwrap().epoch_id, 1);
        assert!(keyring.epoch(2).is_none());
        assert_eq!(keyring.latest_epoch().unwrap().epoch_id, 1);
    }
}

//! The wire shape of a pulled remote event.

use mo_core::{AggregateId, AggregateType};
use serde::{Deserialize, Serialize};

/// One record as produced by the sync transport's pull.
///
/// `payload` is ciphertext exactly as another device appended it; the
/// materializer validates it and writes the same bytes locally (never
/// re-encrypts on pull).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEventRecord {
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub version: u64,
    #[serde(default)]
    pub epoch: Option<u32>,
    #[serde(with = "mo_core::b64")]
    pub payload: Vec<u8>,
    #[serde(default, with = "mo_core::b64::opt")]
    pub keyring_update: Option<Vec<u8>>,
}

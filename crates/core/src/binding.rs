//! AAD binding strings.
//!
//! Every ciphertext in the engine is tied to its identity and version by
//! additional authenticated data: moving ciphertext between rows, versions,
//! or scopes makes the tag check fail. Formats:
//!
//! - event:    `{aggregate_type}:{aggregate_id}:{version}`
//! - snapshot: `{aggregate_id}:snapshot:{version}`
//! - artifact: `cache:{projection_id}:{scope_key}:{cache_version}:g{gseq}:p{pseq}`

use crate::cursor::EffectiveCursor;
use crate::id::{AggregateId, AggregateType};

/// AAD for an event payload.
pub fn event_aad(aggregate_type: AggregateType, aggregate_id: &AggregateId, version: u64) -> Vec<u8> {
    format!("{}:{}:{}", aggregate_type.as_str(), aggregate_id, version).into_bytes()
}

/// AAD for an aggregate snapshot at a version.
pub fn snapshot_aad(aggregate_id: &AggregateId, version: u64) -> Vec<u8> {
    format!("{aggregate_id}:snapshot:{version}").into_bytes()
}

/// AAD for a projection cache or index artifact at a cursor.
pub fn artifact_aad(
    projection_id: &str,
    scope_key: &str,
    cache_version: u64,
    cursor: EffectiveCursor,
) -> Vec<u8> {
    format!(
        "cache:{projection_id}:{scope_key}:{cache_version}:g{}:p{}",
        cursor.global_sequence, cursor.pending_commit_sequence
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_aad_binds_type_id_and_version() {
        let id = AggregateId::new("goal-abc");
        assert_eq!(
            event_aad(AggregateType::Goal, &id, 3),
            b"goal:goal-abc:3".to_vec()
        );
    }

    #[test]
    fn snapshot_aad_shape() {
        let id = AggregateId::new("goal-abc");
        assert_eq!(snapshot_aad(&id, 7), b"goal-abc:snapshot:7".to_vec());
    }

    #[test]
    fn artifact_aad_includes_cursor() {
        let aad = artifact_aad("goal_list", "all", 2, EffectiveCursor::new(14, 3));
        assert_eq!(aad, b"cache:goal_list:all:2:g14:p3".to_vec());
    }
}

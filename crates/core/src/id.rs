//! Strongly-typed identifiers and stable aggregate tags.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identifier of an aggregate.
///
/// Opaque to the engine: the command layer decides the shape (e.g.
/// `goal-018f...`). The engine only ever compares, stores, and binds it
/// into AAD strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

impl AggregateId {
    /// Wrap an identifier. Empty identifiers are rejected at the parse
    /// boundary (`FromStr`), not here; callers constructing ids directly
    /// are trusted.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AggregateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl FromStr for AggregateId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(CoreError::invalid_id("AggregateId must not be empty"));
        }
        Ok(Self(s.to_string()))
    }
}

/// Stable aggregate type tags.
///
/// Closed set: the engine serves the goal/project domain. Tags are part of
/// the AAD binding and the persisted rows, so they must never change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Goal,
    Project,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Goal => "goal",
            AggregateType::Project => "project",
        }
    }

    /// Reserved aggregate-key-store id for this type's search index key.
    pub fn search_key_id(&self) -> &'static str {
        match self {
            AggregateType::Goal => "goal_search",
            AggregateType::Project => "project_search",
        }
    }
}

impl core::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "goal" => Ok(AggregateType::Goal),
            "project" => Ok(AggregateType::Project),
            other => Err(CoreError::UnknownAggregateType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_type_tags_round_trip() {
        for t in [AggregateType::Goal, AggregateType::Project] {
            assert_eq!(t.as_str().parse::<AggregateType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_aggregate_type_is_rejected() {
        let err = "habit".parse::<AggregateType>().unwrap_err();
        assert_eq!(err, CoreError::UnknownAggregateType("habit".to_string()));
    }

    #[test]
    fn empty_aggregate_id_is_rejected() {
        assert!("".parse::<AggregateId>().is_err());
        assert_eq!("goal-abc".parse::<AggregateId>().unwrap().as_str(), "goal-abc");
    }
}

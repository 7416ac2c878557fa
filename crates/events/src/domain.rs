//! Typed domain events for goals and projects.
//!
//! Payload structs are the latest schema version of each event type; older
//! wire versions are upgraded by the registry before they reach these
//! shapes. Event type tags are stable and never change.

use chrono::{DateTime, Utc};
use mo_core::AggregateType;
use serde::{Deserialize, Serialize};

/// A goal came into existence.
///
/// v2 added `color`; v1 payloads are migrated with the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalCreated {
    pub title: String,
    pub color: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub target_date: Option<DateTime<Utc>>,
}

impl GoalCreated {
    /// Color assigned to goals created before v2 introduced the field.
    pub const DEFAULT_COLOR: &'static str = "slate";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalRenamed {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalTargetChanged {
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub target_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalCompleted {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalArchived {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreated {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRenamed {
    pub name: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatusChanged {
    pub status: ProjectStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectArchived {
    pub reason: Option<String>,
}

/// Closed sum of every event the engine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    GoalCreated(GoalCreated),
    GoalRenamed(GoalRenamed),
    GoalTargetChanged(GoalTargetChanged),
    GoalCompleted(GoalCompleted),
    GoalArchived(GoalArchived),
    ProjectCreated(ProjectCreated),
    ProjectRenamed(ProjectRenamed),
    ProjectStatusChanged(ProjectStatusChanged),
    ProjectArchived(ProjectArchived),
}

impl DomainEvent {
    /// Stable wire tag of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::GoalCreated(_) => "goal.created",
            DomainEvent::GoalRenamed(_) => "goal.renamed",
            DomainEvent::GoalTargetChanged(_) => "goal.target_changed",
            DomainEvent::GoalCompleted(_) => "goal.completed",
            DomainEvent::GoalArchived(_) => "goal.archived",
            DomainEvent::ProjectCreated(_) => "project.created",
            DomainEvent::ProjectRenamed(_) => "project.renamed",
            DomainEvent::ProjectStatusChanged(_) => "project.status_changed",
            DomainEvent::ProjectArchived(_) => "project.archived",
        }
    }

    /// Which aggregate stream this event belongs to.
    pub fn aggregate_type(&self) -> AggregateType {
        match self {
            DomainEvent::GoalCreated(_)
            | DomainEvent::GoalRenamed(_)
            | DomainEvent::GoalTargetChanged(_)
            | DomainEvent::GoalCompleted(_)
            | DomainEvent::GoalArchived(_) => AggregateType::Goal,
            DomainEvent::ProjectCreated(_)
            | DomainEvent::ProjectRenamed(_)
            | DomainEvent::ProjectStatusChanged(_)
            | DomainEvent::ProjectArchived(_) => AggregateType::Project,
        }
    }
}

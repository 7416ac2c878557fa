//! Aggregate state folds.
//!
//! Pure event application for the two aggregate kinds. These are the
//! shapes that get encrypted into snapshots; command handling lives
//! outside the engine and only the event-shape contract crosses the
//! boundary.

use chrono::{DateTime, Utc};
use mo_core::AggregateId;
use mo_events::{DomainEvent, ProjectStatus};
use serde::{Deserialize, Serialize};

/// Materialized state of one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalState {
    pub aggregate_id: AggregateId,
    pub version: u64,
    pub title: String,
    pub color: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    pub archived: bool,
}

/// Materialized state of one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub aggregate_id: AggregateId,
    pub version: u64,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub archived: bool,
}

/// Fold a goal event into the running state.
///
/// Returns `false` when the event does not apply (wrong aggregate kind, or
/// a non-create event with no prior state, possible after a skipped
/// missing-key event).
pub fn apply_goal_event(
    state: &mut Option<GoalState>,
    aggregate_id: &AggregateId,
    version: u64,
    event: &DomainEvent,
) -> bool {
    match (state.as_mut(), event) {
        (None, DomainEvent::GoalCreated(p)) => {
            *state = Some(GoalState {
                aggregate_id: aggregate_id.clone(),
                version,
                title: p.title.clone(),
                color: p.color.clone(),
                target_date: p.target_date,
                completed_at: None,
                archived: false,
            });
            true
        }
        (Some(goal), event) => {
            let applied = match event {
                DomainEvent::GoalCreated(p) => {
                    // Replayed create over existing state: take the payload.
                    goal.title = p.title.clone();
                    goal.color = p.color.clone();
                    goal.target_date = p.target_date;
                    true
                }
                DomainEvent::GoalRenamed(p) => {
                    goal.title = p.title.clone();
                    true
                }
                DomainEvent::GoalTargetChanged(p) => {
                    goal.target_date = p.target_date;
                    true
                }
                DomainEvent::GoalCompleted(p) => {
                    goal.completed_at = Some(p.completed_at);
                    true
                }
                DomainEvent::GoalArchived(_) => {
                    goal.archived = true;
                    true
                }
                _ => false,
            };
            if applied {
                goal.version = version;
            }
            applied
        }
        (None, _) => false,
    }
}

/// Fold a project event into the running state.
pub fn apply_project_event(
    state: &mut Option<ProjectState>,
    aggregate_id: &AggregateId,
    version: u64,
    event: &DomainEvent,
) -> bool {
    match (state.as_mut(), event) {
        (None, DomainEvent::ProjectCreated(p)) => {
            *state = Some(ProjectState {
                aggregate_id: aggregate_id.clone(),
                version,
                name: p.name.clone(),
                description: p.description.clone(),
                status: ProjectStatus::Active,
                archived: false,
            });
            true
        }
        (Some(project), event) => {
            let applied = match event {
                DomainEvent::ProjectCreated(p) => {
                    project.name = p.name.clone();
                    project.description = p.description.clone();
                    true
                }
                DomainEvent::ProjectRenamed(p) => {
                    project.name = p.name.clone();
                    true
                }
                DomainEvent::ProjectStatusChanged(p) => {
                    project.status = p.status;
                    true
                }
                DomainEvent::ProjectArchived(_) => {
                    project.archived = true;
                    true
                }
                _ => false,
            };
            if applied {
                project.version = version;
            }
            applied
        }
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mo_events::{GoalCompleted, GoalCreated, GoalRenamed, ProjectCreated, ProjectStatusChanged};

    fn goal_id() -> AggregateId {
        AggregateId::new("goal-abc")
    }

    #[test]
    fn goal_fold_applies_in_version_order() {
        let mut state = None;
        let id = goal_id();

        assert!(apply_goal_event(
            &mut state,
            &id,
            1,
            &DomainEvent::GoalCreated(GoalCreated {
                title: "Run a marathon".to_string(),
                color: "amber".to_string(),
                target_date: None,
            }),
        ));
        assert!(apply_goal_event(
            &mut state,
            &id,
            2,
            &DomainEvent::GoalRenamed(GoalRenamed {
                title: "Run a half marathon".to_string(),
            }),
        ));
        let done_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert!(apply_goal_event(
            &mut state,
            &id,
            3,
            &DomainEvent::GoalCompleted(GoalCompleted { completed_at: done_at }),
        ));

        let goal = state.unwrap();
        assert_eq!(goal.version, 3);
        assert_eq!(goal.title, "Run a half marathon");
        assert_eq!(goal.completed_at, Some(done_at));
    }

    #[test]
    fn non_create_event_without_state_does_not_apply() {
        let mut state = None;
        assert!(!apply_goal_event(
            &mut state,
            &goal_id(),
            2,
            &DomainEvent::GoalRenamed(GoalRenamed {
                title: "x".to_string(),
            }),
        ));
        assert!(state.is_none());
    }

    #[test]
    fn project_fold_tracks_status() {
        let mut state = None;
        let id = AggregateId::new("project-p1");

        apply_project_event(
            &mut state,
            &id,
            1,
            &DomainEvent::ProjectCreated(ProjectCreated {
                name: "Kitchen".to_string(),
                description: None,
            }),
        );
        apply_project_event(
            &mut state,
            &id,
            2,
            &DomainEvent::ProjectStatusChanged(ProjectStatusChanged {
                status: ProjectStatus::Done,
            }),
        );

        let project = state.unwrap();
        assert_eq!(project.status, ProjectStatus::Done);
        assert_eq!(project.version, 2);
    }
}

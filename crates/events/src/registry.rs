//! The event-type registry: latest versions, migration chains, codecs.

use mo_core::AggregateType;
use serde_json::Value as JsonValue;

use crate::domain::{
    DomainEvent, GoalArchived, GoalCompleted, GoalCreated, GoalRenamed, GoalTargetChanged,
    ProjectArchived, ProjectCreated, ProjectRenamed, ProjectStatusChanged,
};
use crate::envelope::VersionedPayload;
use crate::error::{EnvelopeError, EnvelopeResult};

type MigrationFn = fn(JsonValue) -> EnvelopeResult<JsonValue>;
type DecodeFn = fn(JsonValue) -> EnvelopeResult<DomainEvent>;

/// Everything the engine knows about one event type.
pub struct EventTypeSpec {
    pub event_type: &'static str,
    pub aggregate_type: AggregateType,
    pub latest_version: u32,
    /// `(from_version, step)`: each step upgrades `from_version` to
    /// `from_version + 1`. The chain must be gap-free up to
    /// `latest_version`.
    migrations: &'static [(u32, MigrationFn)],
    decode: DecodeFn,
}

impl EventTypeSpec {
    /// Decode a versioned payload into a typed event, upgrading old
    /// versions through the migration chain.
    pub fn decode_payload(&self, payload: &VersionedPayload) -> EnvelopeResult<DomainEvent> {
        if payload.payload_version > self.latest_version {
            return Err(EnvelopeError::FutureVersion {
                event_type: self.event_type.to_string(),
                version: payload.payload_version,
                latest: self.latest_version,
            });
        }

        let data = run_migrations(self, payload.payload_version, payload.data.clone())?;
        (self.decode)(data)
    }
}

fn run_migrations(
    spec: &EventTypeSpec,
    mut version: u32,
    mut data: JsonValue,
) -> EnvelopeResult<JsonValue> {
    while version < spec.latest_version {
        let step = spec
            .migrations
            .iter()
            .find(|(from, _)| *from == version)
            .ok_or_else(|| EnvelopeError::MissingMigration {
                event_type: spec.event_type.to_string(),
                from_version: version,
            })?;
        data = (step.1)(data)?;
        version += 1;
    }
    Ok(data)
}

/// Look up the spec for a stable event-type tag.
pub fn spec_for(event_type: &str) -> Option<&'static EventTypeSpec> {
    REGISTRY.iter().find(|s| s.event_type == event_type)
}

/// Encode a typed event as its latest-version payload.
pub fn encode_payload(event: &DomainEvent) -> EnvelopeResult<VersionedPayload> {
    let spec = spec_for(event.event_type()).ok_or_else(|| {
        // Unreachable while the registry covers the closed enum.
        EnvelopeError::UnknownEventType(event.event_type().to_string())
    })?;

    let data = match event {
        DomainEvent::GoalCreated(p) => serde_json::to_value(p),
        DomainEvent::GoalRenamed(p) => serde_json::to_value(p),
        DomainEvent::GoalTargetChanged(p) => serde_json::to_value(p),
        DomainEvent::GoalCompleted(p) => serde_json::to_value(p),
        DomainEvent::GoalArchived(p) => serde_json::to_value(p),
        DomainEvent::ProjectCreated(p) => serde_json::to_value(p),
        DomainEvent::ProjectRenamed(p) => serde_json::to_value(p),
        DomainEvent::ProjectStatusChanged(p) => serde_json::to_value(p),
        DomainEvent::ProjectArchived(p) => serde_json::to_value(p),
    }
    .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

    Ok(VersionedPayload {
        payload_version: spec.latest_version,
        data,
    })
}

static REGISTRY: &[EventTypeSpec] = &[
    EventTypeSpec {
        event_type: "goal.created",
        aggregate_type: AggregateType::Goal,
        latest_version: 2,
        migrations: &[(1, goal_created_v1_to_v2)],
        decode: decode_goal_created,
    },
    EventTypeSpec {
        event_type: "goal.renamed",
        aggregate_type: AggregateType::Goal,
        latest_version: 1,
        migrations: &[],
        decode: decode_goal_renamed,
    },
    EventTypeSpec {
        event_type: "goal.target_changed",
        aggregate_type: AggregateType::Goal,
        latest_version: 1,
        migrations: &[],
        decode: decode_goal_target_changed,
    },
    EventTypeSpec {
        event_type: "goal.completed",
        aggregate_type: AggregateType::Goal,
        latest_version: 1,
        migrations: &[],
        decode: decode_goal_completed,
    },
    EventTypeSpec {
        event_type: "goal.archived",
        aggregate_type: AggregateType::Goal,
        latest_version: 1,
        migrations: &[],
        decode: decode_goal_archived,
    },
    EventTypeSpec {
        event_type: "project.created",
        aggregate_type: AggregateType::Project,
        latest_version: 1,
        migrations: &[],
        decode: decode_project_created,
    },
    EventTypeSpec {
        event_type: "project.renamed",
        aggregate_type: AggregateType::Project,
        latest_version: 1,
        migrations: &[],
        decode: decode_project_renamed,
    },
    EventTypeSpec {
        event_type: "project.status_changed",
        aggregate_type: AggregateType::Project,
        latest_version: 1,
        migrations: &[],
        decode: decode_project_status_changed,
    },
    EventTypeSpec {
        event_type: "project.archived",
        aggregate_type: AggregateType::Project,
        latest_version: 1,
        migrations: &[],
        decode: decode_project_archived,
    },
];

/// v1 `goal.created` predates the `color` field.
fn goal_created_v1_to_v2(mut data: JsonValue) -> EnvelopeResult<JsonValue> {
    let obj = data.as_object_mut().ok_or_else(|| {
        EnvelopeError::Malformed("goal.created payload must be an object".to_string())
    })?;
    obj.entry("color")
        .or_insert_with(|| JsonValue::String(GoalCreated::DEFAULT_COLOR.to_string()));
    Ok(data)
}

fn malformed(e: serde_json::Error) -> EnvelopeError {
    EnvelopeError::Malformed(e.to_string())
}

fn decode_goal_created(data: JsonValue) -> EnvelopeResult<DomainEvent> {
    serde_json::from_value::<GoalCreated>(data)
        .map(DomainEvent::GoalCreated)
        .map_err(malformed)
}

fn decode_goal_renamed(data: JsonValue) -> EnvelopeResult<DomainEvent> {
    serde_json::from_value::<GoalRenamed>(data)
        .map(DomainEvent::GoalRenamed)
        .map_err(malformed)
}

fn decode_goal_target_changed(data: JsonValue) -> EnvelopeResult<DomainEvent> {
    serde_json::from_value::<GoalTargetChanged>(data)
        .map(DomainEvent::GoalTargetChanged)
        .map_err(malformed)
}

fn decode_goal_completed(data: JsonValue) -> EnvelopeResult<DomainEvent> {
    serde_json::from_value::<GoalCompleted>(data)
        .map(DomainEvent::GoalCompleted)
        .map_err(malformed)
}

fn decode_goal_archived(data: JsonValue) -> EnvelopeResult<DomainEvent> {
    serde_json::from_value::<GoalArchived>(data)
        .map(DomainEvent::GoalArchived)
        .map_err(malformed)
}

fn decode_project_created(data: JsonValue) -> EnvelopeResult<DomainEvent> {
    serde_json::from_value::<ProjectCreated>(data)
        .map(DomainEvent::ProjectCreated)
        .map_err(malformed)
}

fn decode_project_renamed(data: JsonValue) -> EnvelopeResult<DomainEvent> {
    serde_json::from_value::<ProjectRenamed>(data)
        .map(DomainEvent::ProjectRenamed)
        .map_err(malformed)
}

fn decode_project_status_changed(data: JsonValue) -> EnvelopeResult<DomainEvent> {
    serde_json::from_value::<ProjectStatusChanged>(data)
        .map(DomainEvent::ProjectStatusChanged)
        .map_err(malformed)
}

fn decode_project_archived(data: JsonValue) -> EnvelopeResult<DomainEvent> {
    serde_json::from_value::<ProjectArchived>(data)
        .map(DomainEvent::ProjectArchived)
        .map_err(malformed)
}

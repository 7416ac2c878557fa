//! In-process committed-event bus.
//!
//! Ordered, synchronous dispatch: subscribers run in registration order
//! and the first failure aborts the publish. The publisher relies on that
//! to keep its cursor behind any batch a subscriber rejected, which is
//! what makes delivery at-least-once rather than at-most-once.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use mo_core::{AggregateId, AggregateType};

use crate::domain::DomainEvent;
use crate::envelope::EventMeta;

/// A decoded event as handed to subscribers.
#[derive(Debug, Clone)]
pub struct CommittedEvent {
    pub record_id: Uuid,
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub version: u64,
    pub commit_sequence: i64,
    pub meta: EventMeta,
    pub event: DomainEvent,
}

/// Error returned by a subscriber; fails the containing publish batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("subscriber failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A committed-event subscriber.
///
/// Handlers must be idempotent: after a crash between publish and cursor
/// persistence the same events are delivered again.
pub trait CommittedEventHandler: Send + Sync {
    fn handle(&self, event: &CommittedEvent) -> Result<(), HandlerError>;
}

impl<F> CommittedEventHandler for F
where
    F: Fn(&CommittedEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &CommittedEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Registration-ordered dispatcher.
#[derive(Clone, Default)]
pub struct CommittedEventBus {
    subscribers: Arc<RwLock<Vec<Arc<dyn CommittedEventHandler>>>>,
}

impl CommittedEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: Arc<dyn CommittedEventHandler>) {
        self.subscribers
            .write()
            .expect("bus subscriber lock")
            .push(handler);
    }

    /// Dispatch one event to every subscriber in order; the first error
    /// propagates.
    pub fn publish(&self, event: &CommittedEvent) -> Result<(), HandlerError> {
        let subscribers = self
            .subscribers
            .read()
            .expect("bus subscriber lock")
            .clone();
        for handler in &subscribers {
            handler.handle(event)?;
        }
        Ok(())
    }

    /// Dispatch a batch in order, stopping at the first error.
    pub fn publish_all(&self, events: &[CommittedEvent]) -> Result<(), HandlerError> {
        for event in events {
            self.publish(event)?;
        }
        Ok(())
    }
}

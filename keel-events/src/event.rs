//! Event definitions and traits

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use uuid::Uuid;

/// Event trait
///
/// Anything dispatched through the [`EventDispatcher`](crate::EventDispatcher)
/// implements this trait. Listeners receive the event by mutable reference and
/// may mutate it in place; a listener can also stop propagation, which
/// prevents lower-priority listeners from running.
pub trait Event: Send + 'static {
    /// Get event name (used for logging/diagnostics)
    fn event_name(&self) -> &str;

    /// Whether a previous listener stopped propagation
    fn propagation_stopped(&self) -> bool;

    /// Stop propagation: no further listeners run for this dispatch
    fn stop_propagation(&mut self);

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Mutable cast to Any for downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Propagation state embedded by concrete event types.
///
/// Embedding this struct and delegating the two propagation methods to it is
/// the conventional way to implement [`Event`].
#[derive(Debug, Clone, Default)]
pub struct Propagation {
    stopped: bool,
}

impl Propagation {
    pub fn new() -> Self {
        Self { stopped: false }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Base event metadata
///
/// Optional identity/tracing payload for application-defined events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub id: Uuid,

    /// Event name/type
    pub name: String,

    /// Timestamp when event was created
    pub timestamp: DateTime<Utc>,

    /// Optional correlation ID for tracing
    pub correlation_id: Option<Uuid>,
}

impl EventMetadata {
    /// Create new event metadata
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestEvent {
        metadata: EventMetadata,
        propagation: Propagation,
    }

    impl Event for TestEvent {
        fn event_name(&self) -> &str {
            &self.metadata.name
        }

        fn propagation_stopped(&self) -> bool {
            self.propagation.is_stopped()
        }

        fn stop_propagation(&mut self) {
            self.propagation.stop();
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_event_metadata() {
        let metadata = EventMetadata::new("order_placed").with_correlation_id(Uuid::new_v4());

        assert_eq!(metadata.name, "order_placed");
        assert!(metadata.correlation_id.is_some());
    }

    #[test]
    fn test_propagation_flag() {
        let mut event = TestEvent {
            metadata: EventMetadata::new("test_event"),
            propagation: Propagation::new(),
        };

        assert!(!event.propagation_stopped());
        event.stop_propagation();
        assert!(event.propagation_stopped());
    }
}

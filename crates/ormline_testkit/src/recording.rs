//! Event subscribers for asserting on lifecycle hooks.

use ormline_core::{
    CoreError, CoreResult, EntityEvent, EventSubscriber, EventType, FlushEvent, Value,
};
use parking_lot::Mutex;

/// One delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Event type.
    pub event_type: EventType,
    /// Entity type, `None` for flush events.
    pub entity_name: Option<String>,
    /// Change sets carried by a flush event; zero for entity events.
    pub change_sets: usize,
}

/// Records every event it receives.
///
/// Can also write a field from a `Before*` hook and fail on a chosen event.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<RecordedEvent>>,
    entity_filter: Option<String>,
    stamp: Option<(EventType, String, Value)>,
    fail_on: Option<EventType>,
}

impl RecordingSubscriber {
    /// Creates a subscriber receiving hooks for every entity type.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only receive entity hooks for `entity_name`.
    #[must_use]
    pub fn only(mut self, entity_name: &str) -> Self {
        self.entity_filter = Some(entity_name.to_string());
        self
    }

    /// Sets `field` to `value` whenever `event_type` fires.
    #[must_use]
    pub fn stamp(mut self, event_type: EventType, field: &str, value: impl Into<Value>) -> Self {
        self.stamp = Some((event_type, field.to_string(), value.into()));
        self
    }

    /// Returns an error from the hook whenever `event_type` fires.
    #[must_use]
    pub fn fail_on(mut self, event_type: EventType) -> Self {
        self.fail_on = Some(event_type);
        self
    }

    /// Returns the recorded events.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded event types in delivery order.
    pub fn event_types(&self) -> Vec<EventType> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }

    /// Counts recorded events of one type.
    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Forgets recorded events.
    pub fn reset(&self) {
        self.events.lock().clear();
    }

    fn check_failure(&self, event_type: EventType) -> CoreResult<()> {
        if self.fail_on == Some(event_type) {
            return Err(CoreError::invalid_operation(format!(
                "{event_type:?} hook rejected the write"
            )));
        }
        Ok(())
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn subscribes_to(&self, entity_name: &str) -> bool {
        self.entity_filter
            .as_deref()
            .map_or(true, |only| only == entity_name)
    }

    fn on_entity_event(&self, event: &mut EntityEvent<'_>) -> CoreResult<()> {
        self.events.lock().push(RecordedEvent {
            event_type: event.event_type,
            entity_name: Some(event.entity.entity_name().to_string()),
            change_sets: 0,
        });
        if let Some((event_type, field, value)) = &self.stamp {
            if *event_type == event.event_type {
                event.entity.set(field, value.clone());
            }
        }
        self.check_failure(event.event_type)
    }

    fn on_flush_event(&self, event: &FlushEvent<'_>) -> CoreResult<()> {
        self.events.lock().push(RecordedEvent {
            event_type: event.event_type,
            entity_name: None,
            change_sets: event.change_sets.len(),
        });
        self.check_failure(event.event_type)
    }
}

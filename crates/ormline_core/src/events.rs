//! Lifecycle events.
//!
//! Subscribers observe flush phases and individual writes. Entity hooks run
//! with mutable access to the entity: changes made by a `Before*` hook are
//! folded into the payload of the write that triggered it.

use crate::change_set::{ChangeSet, ChangeSetType};
use crate::entity::Entity;
use crate::error::CoreResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Before change sets are computed.
    BeforeFlush,
    /// After change sets are computed, before anything is written.
    OnFlush,
    /// After a successful commit. Subscriber errors are logged, not returned.
    AfterFlush,
    /// Before an entity is inserted.
    BeforeCreate,
    /// After an entity is inserted.
    AfterCreate,
    /// Before an entity is updated.
    BeforeUpdate,
    /// After an entity is updated.
    AfterUpdate,
    /// Before an entity is deleted.
    BeforeDelete,
    /// After an entity is deleted.
    AfterDelete,
}

impl EventType {
    /// The hook pair surrounding a write of the given kind.
    #[must_use]
    pub const fn for_write(kind: ChangeSetType) -> (Self, Self) {
        match kind {
            ChangeSetType::Create => (EventType::BeforeCreate, EventType::AfterCreate),
            ChangeSetType::Update => (EventType::BeforeUpdate, EventType::AfterUpdate),
            ChangeSetType::Delete => (EventType::BeforeDelete, EventType::AfterDelete),
        }
    }

    /// Returns true for the three flush events.
    #[must_use]
    pub const fn is_flush_event(self) -> bool {
        matches!(
            self,
            EventType::BeforeFlush | EventType::OnFlush | EventType::AfterFlush
        )
    }
}

/// An entity hook invocation.
#[derive(Debug)]
pub struct EntityEvent<'a> {
    /// Which hook is running.
    pub event_type: EventType,
    /// The entity being written.
    pub entity: &'a mut Entity,
    /// The change set being applied.
    pub change_set: &'a ChangeSet,
}

/// A flush event invocation.
#[derive(Debug)]
pub struct FlushEvent<'a> {
    /// Which flush phase is running.
    pub event_type: EventType,
    /// Change sets of this cycle; empty before computation.
    pub change_sets: &'a [ChangeSet],
}

/// Receives lifecycle events.
///
/// An error returned from a hook aborts the commit that raised it.
pub trait EventSubscriber: Send + Sync {
    /// Returns true if entity hooks for this type should be delivered.
    fn subscribes_to(&self, _entity_name: &str) -> bool {
        true
    }

    /// Called around every write.
    fn on_entity_event(&self, _event: &mut EntityEvent<'_>) -> CoreResult<()> {
        Ok(())
    }

    /// Called at each flush phase.
    fn on_flush_event(&self, _event: &FlushEvent<'_>) -> CoreResult<()> {
        Ok(())
    }
}

/// Dispatches events to subscribers in registration order.
#[derive(Default)]
pub struct EventManager {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventManager {
    /// Creates a manager without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Returns the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventSubscriber>> {
        self.subscribers.read().clone()
    }

    /// Returns true if any subscriber wants entity hooks for this type.
    pub fn has_entity_listeners(&self, entity_name: &str) -> bool {
        self.subscribers
            .read()
            .iter()
            .any(|s| s.subscribes_to(entity_name))
    }

    /// Delivers an entity hook.
    pub fn dispatch_entity(
        &self,
        event_type: EventType,
        entity: &mut Entity,
        change_set: &ChangeSet,
    ) -> CoreResult<()> {
        for subscriber in self.snapshot() {
            if !subscriber.subscribes_to(entity.entity_name()) {
                continue;
            }
            let mut event = EntityEvent {
                event_type,
                entity: &mut *entity,
                change_set,
            };
            subscriber.on_entity_event(&mut event)?;
        }
        Ok(())
    }

    /// Delivers a flush event.
    pub fn dispatch_flush(
        &self,
        event_type: EventType,
        change_sets: &[ChangeSet],
    ) -> CoreResult<()> {
        let event = FlushEvent {
            event_type,
            change_sets,
        };
        for subscriber in self.snapshot() {
            subscriber.on_flush_event(&event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EntityMeta;
    use crate::types::EntityToken;
    use crate::value::Value;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Recorder {
        only: Option<&'static str>,
        seen: Mutex<Vec<EventType>>,
    }

    impl EventSubscriber for Recorder {
        fn subscribes_to(&self, entity_name: &str) -> bool {
            self.only.map_or(true, |only| only == entity_name)
        }

        fn on_entity_event(&self, event: &mut EntityEvent<'_>) -> CoreResult<()> {
            self.seen.lock().push(event.event_type);
            event.entity.set("touched", Value::Bool(true));
            Ok(())
        }

        fn on_flush_event(&self, event: &FlushEvent<'_>) -> CoreResult<()> {
            self.seen.lock().push(event.event_type);
            Ok(())
        }
    }

    #[test]
    fn hook_pairs() {
        assert_eq!(
            EventType::for_write(ChangeSetType::Delete),
            (EventType::BeforeDelete, EventType::AfterDelete)
        );
        assert!(EventType::OnFlush.is_flush_event());
        assert!(!EventType::AfterCreate.is_flush_event());
    }

    #[test]
    fn entity_hooks_respect_filter_and_may_mutate() {
        let manager = EventManager::new();
        let books = Arc::new(Recorder {
            only: Some("Book"),
            ..Recorder::default()
        });
        manager.subscribe(books.clone());

        let meta = EntityMeta::new("Author").primary_key("id");
        let mut author = Entity::new(EntityToken::new(0), "Author", true, BTreeMap::new());
        let cs = ChangeSet::new(ChangeSetType::Create, &meta, author.token());
        manager
            .dispatch_entity(EventType::BeforeCreate, &mut author, &cs)
            .unwrap();
        assert!(books.seen.lock().is_empty());
        assert!(!manager.has_entity_listeners("Author"));

        let meta = EntityMeta::new("Book").primary_key("id");
        let mut book = Entity::new(EntityToken::new(1), "Book", true, BTreeMap::new());
        let cs = ChangeSet::new(ChangeSetType::Create, &meta, book.token());
        manager
            .dispatch_entity(EventType::BeforeCreate, &mut book, &cs)
            .unwrap();
        assert_eq!(*books.seen.lock(), vec![EventType::BeforeCreate]);
        assert_eq!(book.value("touched"), Some(&Value::Bool(true)));
    }

    #[test]
    fn flush_events_reach_everyone() {
        let manager = EventManager::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder {
            only: Some("Nothing"),
            ..Recorder::default()
        });
        manager.subscribe(a.clone());
        manager.subscribe(b.clone());
        manager.dispatch_flush(EventType::OnFlush, &[]).unwrap();
        assert_eq!(*a.seen.lock(), vec![EventType::OnFlush]);
        assert_eq!(*b.seen.lock(), vec![EventType::OnFlush]);
        assert_eq!(manager.subscriber_count(), 2);
    }
}

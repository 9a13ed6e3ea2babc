//! Arena of entity instances and relation collections.

use super::{Collection, Entity, FieldValue};
use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, EntityToken};
use std::collections::BTreeMap;

/// Owns every entity and collection of one unit of work.
///
/// Relations between entities are tokens into this arena, so cyclic object
/// graphs need no shared ownership. Slots are never reused. Entity slots
/// live as long as the arena; collection slots are released once no owner
/// field points at them.
#[derive(Debug, Default)]
pub struct EntityGraph {
    entities: Vec<Entity>,
    collections: Vec<Option<Collection>>,
}

impl EntityGraph {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &mut self,
        entity_name: &str,
        initialized: bool,
        fields: BTreeMap<String, FieldValue>,
    ) -> EntityToken {
        let token = EntityToken::new(self.entities.len() as u64);
        self.entities
            .push(Entity::new(token, entity_name, initialized, fields));
        token
    }

    pub(crate) fn new_collection(&mut self, owner: EntityToken, property: &str) -> CollectionId {
        let id = CollectionId::new(self.collections.len() as u32);
        self.collections
            .push(Some(Collection::new(id, owner, property)));
        id
    }

    /// Returns an entity, if the token is valid.
    #[must_use]
    pub fn get(&self, token: EntityToken) -> Option<&Entity> {
        self.entities.get(token.index())
    }

    /// Returns an entity or fails with `UnknownToken`.
    pub fn entity(&self, token: EntityToken) -> CoreResult<&Entity> {
        self.get(token).ok_or(CoreError::UnknownToken { token })
    }

    pub(crate) fn entity_mut(&mut self, token: EntityToken) -> CoreResult<&mut Entity> {
        self.entities
            .get_mut(token.index())
            .ok_or(CoreError::UnknownToken { token })
    }

    /// Returns a collection, if the ID is valid and not released.
    #[must_use]
    pub fn collection(&self, id: CollectionId) -> Option<&Collection> {
        self.collections.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn collection_mut(&mut self, id: CollectionId) -> Option<&mut Collection> {
        self.collections.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// True if the owner's field still holds this collection.
    #[must_use]
    pub fn is_attached(&self, collection: &Collection) -> bool {
        self.get(collection.owner())
            .and_then(|owner| owner.collection(collection.property()))
            == Some(collection.id())
    }

    /// Drops every collection its owner no longer refers to.
    ///
    /// Returns the number of released slots.
    pub(crate) fn release_detached_collections(&mut self) -> usize {
        let detached: Vec<usize> = self
            .collections()
            .filter(|c| !self.is_attached(c))
            .map(|c| c.id().index())
            .collect();
        for index in &detached {
            self.collections[*index] = None;
        }
        detached.len()
    }

    /// Iterates over all entities in creation order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Iterates over all live collections in creation order.
    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter().flatten()
    }

    /// Returns the number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the arena holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the entities directly referenced from a field: the target of
    /// a to-one reference, or the materialized items of a collection.
    #[must_use]
    pub fn related(&self, token: EntityToken, property: &str) -> Vec<EntityToken> {
        match self.get(token).and_then(|e| e.get(property)) {
            Some(FieldValue::Entity(target)) => vec![*target],
            Some(FieldValue::Collection(id)) => self
                .collection(*id)
                .filter(|c| c.is_initialized())
                .map(|c| c.items().to_vec())
                .unwrap_or_default(),
            Some(FieldValue::Items(items)) => items.clone(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn tokens_are_sequential() {
        let mut graph = EntityGraph::new();
        let a = graph.insert("Author", true, BTreeMap::new());
        let b = graph.insert("Book", true, BTreeMap::new());
        assert_eq!(a, EntityToken::new(0));
        assert_eq!(b, EntityToken::new(1));
        assert_eq!(graph.len(), 2);
        assert!(matches!(
            graph.entity(EntityToken::new(7)),
            Err(CoreError::UnknownToken { .. })
        ));
    }

    #[test]
    fn related_skips_uninitialized_collections() {
        let mut graph = EntityGraph::new();
        let author = graph.insert("Author", true, BTreeMap::new());
        let book = graph.insert("Book", true, BTreeMap::new());
        graph
            .entity_mut(book)
            .unwrap()
            .set("author", FieldValue::Entity(author));
        assert_eq!(graph.related(book, "author"), vec![author]);

        let books = graph.new_collection(author, "books");
        graph
            .entity_mut(author)
            .unwrap()
            .set("books", FieldValue::Collection(books));
        assert!(graph.related(author, "books").is_empty());

        graph.collection_mut(books).unwrap().hydrate(vec![book]);
        assert_eq!(graph.related(author, "books"), vec![book]);

        graph
            .entity_mut(book)
            .unwrap()
            .set("title", Value::from("Dune"));
        assert!(graph.related(book, "title").is_empty());
    }

    #[test]
    fn replaced_collections_are_released() {
        let mut graph = EntityGraph::new();
        let author = graph.insert("Author", true, BTreeMap::new());
        let old = graph.new_collection(author, "books");
        let new = graph.new_collection(author, "books");
        graph
            .entity_mut(author)
            .unwrap()
            .set("books", FieldValue::Collection(new));

        assert!(!graph.is_attached(graph.collection(old).unwrap()));
        assert_eq!(graph.release_detached_collections(), 1);
        assert!(graph.collection(old).is_none());
        assert!(graph.collection(new).is_some());
        assert_eq!(graph.collections().count(), 1);
        assert_eq!(graph.release_detached_collections(), 0);

        let next = graph.new_collection(author, "books");
        assert_ne!(next, old);
    }
}

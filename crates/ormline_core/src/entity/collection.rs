//! Relation collections.

use crate::types::{CollectionId, EntityToken};

/// An ordered collection of related entities attached to an owner.
///
/// The collection keeps the membership it had at the last synchronization
/// so the driver only receives the difference.
#[derive(Debug, Clone)]
pub struct Collection {
    id: CollectionId,
    owner: EntityToken,
    property: String,
    items: Vec<EntityToken>,
    snapshot: Vec<EntityToken>,
    initialized: bool,
    dirty: bool,
}

impl Collection {
    pub(crate) fn new(id: CollectionId, owner: EntityToken, property: &str) -> Self {
        Self {
            id,
            owner,
            property: property.to_string(),
            items: Vec::new(),
            snapshot: Vec::new(),
            initialized: false,
            dirty: false,
        }
    }

    /// Returns the collection ID.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.id
    }

    /// Returns the owning entity.
    #[must_use]
    pub fn owner(&self) -> EntityToken {
        self.owner
    }

    /// Returns the relation property on the owner.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Returns the current items. Empty while uninitialized.
    #[must_use]
    pub fn items(&self) -> &[EntityToken] {
        &self.items
    }

    /// Returns true if the collection contains `token`.
    #[must_use]
    pub fn contains(&self, token: EntityToken) -> bool {
        self.items.contains(&token)
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the collection has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true once the membership has been loaded or set.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns true if membership changed since the last synchronization.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Items present now but not at the last synchronization.
    #[must_use]
    pub fn added(&self) -> Vec<EntityToken> {
        self.items
            .iter()
            .filter(|t| !self.snapshot.contains(t))
            .copied()
            .collect()
    }

    /// Items present at the last synchronization but not now.
    #[must_use]
    pub fn removed(&self) -> Vec<EntityToken> {
        self.snapshot
            .iter()
            .filter(|t| !self.items.contains(t))
            .copied()
            .collect()
    }

    /// Sets loaded membership; the collection becomes clean.
    pub(crate) fn hydrate(&mut self, items: Vec<EntityToken>) {
        self.snapshot.clone_from(&items);
        self.items = items;
        self.initialized = true;
        self.dirty = false;
    }

    /// Seeds a collection of a new owner; every item counts as added.
    pub(crate) fn seed(&mut self, items: Vec<EntityToken>) {
        self.dirty = !items.is_empty();
        self.items = items;
        self.snapshot.clear();
        self.initialized = true;
    }

    /// Appends an item. Returns false if it was already present.
    pub(crate) fn add(&mut self, token: EntityToken) -> bool {
        if self.contains(token) {
            return false;
        }
        self.items.push(token);
        self.dirty = true;
        true
    }

    /// Removes an item. Returns false if it was not present.
    pub(crate) fn remove(&mut self, token: EntityToken) -> bool {
        let before = self.items.len();
        self.items.retain(|t| *t != token);
        let removed = self.items.len() != before;
        self.dirty |= removed;
        removed
    }

    /// Records the current membership as synchronized.
    pub(crate) fn take_snapshot(&mut self) {
        self.snapshot.clone_from(&self.items);
        self.dirty = false;
    }

    pub(crate) fn snapshot(&self) -> &[EntityToken] {
        &self.snapshot
    }

    pub(crate) fn restore_snapshot(&mut self, snapshot: Vec<EntityToken>, dirty: bool) {
        self.snapshot = snapshot;
        self.dirty = dirty;
    }
}

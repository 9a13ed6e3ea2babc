//! Entity instances, relation collections and the arena that owns them.

mod collection;
mod graph;

pub use collection::Collection;
pub use graph::EntityGraph;

use crate::metadata::EntityMeta;
use crate::types::{CollectionId, EntityToken};
use crate::value::{PrimaryKey, Value};
use std::collections::BTreeMap;

/// The live value of one entity property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// A scalar value, or a raw identifier on a to-one relation.
    Value(Value),
    /// A loaded or lazy reference to another entity.
    Entity(EntityToken),
    /// A relation collection in the arena.
    Collection(CollectionId),
    /// A raw item list on a to-many relation, not yet wrapped into a collection.
    Items(Vec<EntityToken>),
}

impl FieldValue {
    /// Returns the scalar value, if this is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the referenced entity, if this is a reference.
    #[must_use]
    pub fn as_entity(&self) -> Option<EntityToken> {
        match self {
            FieldValue::Entity(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the collection ID, if this is a collection.
    #[must_use]
    pub fn as_collection(&self) -> Option<CollectionId> {
        match self {
            FieldValue::Collection(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns true for `Value(Null)`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Value(Value::Null))
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

impl From<EntityToken> for FieldValue {
    fn from(token: EntityToken) -> Self {
        FieldValue::Entity(token)
    }
}

impl From<Vec<EntityToken>> for FieldValue {
    fn from(items: Vec<EntityToken>) -> Self {
        FieldValue::Items(items)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Value(Value::from(s))
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Value(Value::Integer(n))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Value(Value::Bool(b))
    }
}

/// An entity instance in the arena.
#[derive(Debug, Clone)]
pub struct Entity {
    token: EntityToken,
    entity_name: String,
    initialized: bool,
    fields: BTreeMap<String, FieldValue>,
}

impl Entity {
    pub(crate) fn new(
        token: EntityToken,
        entity_name: &str,
        initialized: bool,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            token,
            entity_name: entity_name.to_string(),
            initialized,
            fields,
        }
    }

    /// Returns the instance token.
    #[must_use]
    pub fn token(&self) -> EntityToken {
        self.token
    }

    /// Returns the entity type name.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Returns false for a lazy reference whose state was never loaded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    /// Returns a field, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns a scalar field, if present.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(FieldValue::as_value)
    }

    /// Returns the entity referenced by a to-one field, if any.
    #[must_use]
    pub fn reference(&self, name: &str) -> Option<EntityToken> {
        self.get(name).and_then(FieldValue::as_entity)
    }

    /// Returns the collection held by a to-many field, if wrapped.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<CollectionId> {
        self.get(name).and_then(FieldValue::as_collection)
    }

    /// Iterates over all present fields.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sets a field without relation bookkeeping.
    ///
    /// Lifecycle hooks use this to adjust values before a write.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Removes a field, leaving it absent.
    pub fn unset(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Extracts the primary key from scalar key fields.
    ///
    /// Returns `None` unless every key field holds a non-null value. Key
    /// fields holding a reference count as missing; see [`Self::primary_key_with`].
    #[must_use]
    pub fn primary_key(&self, meta: &EntityMeta) -> Option<PrimaryKey> {
        self.primary_key_with(meta, |_| None)
    }

    /// Extracts the primary key, resolving key fields that reference
    /// another entity through `resolve`.
    pub fn primary_key_with<F>(&self, meta: &EntityMeta, resolve: F) -> Option<PrimaryKey>
    where
        F: Fn(EntityToken) -> Option<Value>,
    {
        let parts = meta
            .primary_keys
            .iter()
            .map(|field| match self.get(field)? {
                FieldValue::Value(v) if !v.is_null() => Some(v.clone()),
                FieldValue::Entity(target) => resolve(*target).filter(|v| !v.is_null()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        let pk = PrimaryKey::composite(parts);
        pk.is_complete().then_some(pk)
    }

    /// Writes primary key parts into the key fields.
    pub(crate) fn assign_primary_key(&mut self, meta: &EntityMeta, pk: &PrimaryKey) {
        for (field, part) in meta.primary_keys.iter().zip(pk.parts()) {
            self.set(field, part.clone());
        }
    }

    /// Clears the key fields (used to undo a store-generated key).
    pub(crate) fn clear_primary_key(&mut self, meta: &EntityMeta) {
        for field in &meta.primary_keys {
            self.unset(field);
        }
    }
}

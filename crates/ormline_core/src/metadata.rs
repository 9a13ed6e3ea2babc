//! Entity metadata consumed by the unit of work.
//!
//! Metadata is declared with builders and registered in a
//! [`MetadataStorage`], which is shared (behind an `Arc`) between the unit of
//! work and its storage driver.
//!
//! ```
//! use ormline_core::metadata::{Cascade, EntityMeta, IdStrategy, MetadataStorage, RelationMeta};
//!
//! let mut storage = MetadataStorage::new();
//! storage.register(
//!     EntityMeta::new("Author")
//!         .primary_key("id")
//!         .id_strategy(IdStrategy::Increment)
//!         .scalar("name")
//!         .relation(
//!             "books",
//!             RelationMeta::to_many_inverse("Book", "author").cascade(&[Cascade::All]),
//!         ),
//! );
//! storage.register(
//!     EntityMeta::new("Book")
//!         .primary_key("id")
//!         .id_strategy(IdStrategy::Increment)
//!         .scalar("title")
//!         .relation("author", RelationMeta::to_one("Author").required().inversed_by("books")),
//! );
//! storage.validate().unwrap();
//! ```

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Arc;

/// A cascaded operation, or the `All` wildcard in a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cascade {
    /// Cascade `persist`.
    Persist,
    /// Cascade `remove`.
    Remove,
    /// Cascade `merge`.
    Merge,
    /// Wildcard: every operation.
    All,
}

impl Cascade {
    const fn bits(self) -> u8 {
        match self {
            Cascade::Persist => 0b001,
            Cascade::Remove => 0b010,
            Cascade::Merge => 0b100,
            Cascade::All => 0b111,
        }
    }
}

/// The cascade operations declared on a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CascadeSet(u8);

impl CascadeSet {
    /// No cascading.
    pub const NONE: Self = Self(0);
    /// Cascade everything.
    pub const ALL: Self = Self(0b111);

    /// Builds a set from declared operations.
    #[must_use]
    pub fn of(ops: &[Cascade]) -> Self {
        Self(ops.iter().fold(0, |acc, op| acc | op.bits()))
    }

    /// Returns true if the operation (or the wildcard) is declared.
    #[must_use]
    pub const fn includes(self, op: Cascade) -> bool {
        self.0 & op.bits() == op.bits()
    }

    /// Returns true if nothing cascades.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Relation kind; owning sides carry the foreign key or the pivot rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Many-to-one or owning one-to-one; stores a foreign key.
    ToOneOwning,
    /// Inverse one-to-one; no column.
    ToOneInverse,
    /// Owning many-to-many; synchronized through a pivot.
    ToManyOwning,
    /// One-to-many or inverse many-to-many.
    ToManyInverse,
}

impl RelationKind {
    /// Returns true for to-one kinds.
    #[must_use]
    pub const fn is_to_one(self) -> bool {
        matches!(self, RelationKind::ToOneOwning | RelationKind::ToOneInverse)
    }

    /// Returns true for to-many kinds.
    #[must_use]
    pub const fn is_to_many(self) -> bool {
        !self.is_to_one()
    }
}

/// Primary key generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// The caller sets the key before persisting.
    #[default]
    Assigned,
    /// The driver assigns an increasing integer on insert.
    Increment,
    /// The driver assigns a random UUID on insert.
    Uuid,
}

impl IdStrategy {
    /// Returns true if the driver produces the identifier.
    #[must_use]
    pub const fn is_generated(self) -> bool {
        !matches!(self, IdStrategy::Assigned)
    }
}

/// Relation descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMeta {
    /// Relation kind.
    pub kind: RelationKind,
    /// Target entity type.
    pub target: String,
    /// Declared cascade operations.
    pub cascade: CascadeSet,
    /// Whether children dropped from this relation are deleted.
    pub orphan_removal: bool,
    /// Whether the foreign key may be null. Only meaningful on owning to-one.
    pub nullable: bool,
    /// On an inverse side: the owning property on the target.
    pub mapped_by: Option<String>,
    /// On an owning side: the inverse property on the target, if bidirectional.
    pub inversed_by: Option<String>,
}

impl RelationMeta {
    fn with_kind(kind: RelationKind, target: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            cascade: CascadeSet::of(&[Cascade::Persist, Cascade::Merge]),
            orphan_removal: false,
            nullable: true,
            mapped_by: None,
            inversed_by: None,
        }
    }

    /// Many-to-one (or owning one-to-one) relation to `target`.
    #[must_use]
    pub fn to_one(target: &str) -> Self {
        Self::with_kind(RelationKind::ToOneOwning, target)
    }

    /// Inverse one-to-one relation mapped by `mapped_by` on `target`.
    #[must_use]
    pub fn to_one_inverse(target: &str, mapped_by: &str) -> Self {
        let mut meta = Self::with_kind(RelationKind::ToOneInverse, target);
        meta.mapped_by = Some(mapped_by.to_string());
        meta
    }

    /// Owning many-to-many relation to `target`.
    #[must_use]
    pub fn to_many(target: &str) -> Self {
        Self::with_kind(RelationKind::ToManyOwning, target)
    }

    /// One-to-many or inverse many-to-many relation mapped by `mapped_by` on `target`.
    #[must_use]
    pub fn to_many_inverse(target: &str, mapped_by: &str) -> Self {
        let mut meta = Self::with_kind(RelationKind::ToManyInverse, target);
        meta.mapped_by = Some(mapped_by.to_string());
        meta
    }

    /// Replaces the cascade declaration.
    #[must_use]
    pub fn cascade(mut self, ops: &[Cascade]) -> Self {
        self.cascade = CascadeSet::of(ops);
        self
    }

    /// Enables orphan removal.
    #[must_use]
    pub fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    /// Marks the foreign key as non-nullable.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Names the inverse property on the target.
    #[must_use]
    pub fn inversed_by(mut self, property: &str) -> Self {
        self.inversed_by = Some(property.to_string());
        self
    }

    /// The property on the target that mirrors this one, if any.
    #[must_use]
    pub fn other_side(&self) -> Option<&str> {
        self.mapped_by.as_deref().or(self.inversed_by.as_deref())
    }

    /// Returns true if cascading `op` (or an orphan-removal delete) applies.
    #[must_use]
    pub fn cascades(&self, op: Cascade) -> bool {
        self.cascade.includes(op) || (op == Cascade::Remove && self.orphan_removal)
    }
}

/// A property of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMeta {
    /// Property name.
    pub name: String,
    /// Relation descriptor; `None` for scalar properties.
    pub relation: Option<RelationMeta>,
}

impl PropertyMeta {
    /// Returns true if the property is stored in the entity's own row.
    #[must_use]
    pub fn is_persistable(&self) -> bool {
        match &self.relation {
            None => true,
            Some(rel) => rel.kind == RelationKind::ToOneOwning,
        }
    }

    /// Returns the relation kind, if this is a relation.
    #[must_use]
    pub fn relation_kind(&self) -> Option<RelationKind> {
        self.relation.as_ref().map(|r| r.kind)
    }
}

/// Metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMeta {
    /// Entity type name.
    pub name: String,
    /// Storage name (table or collection).
    pub table: String,
    /// Primary key fields, in key order.
    pub primary_keys: Vec<String>,
    /// Version field for optimistic locking.
    pub version_field: Option<String>,
    /// Primary key strategy.
    pub id_strategy: IdStrategy,
    /// Properties in declaration order.
    pub properties: Vec<PropertyMeta>,
}

impl EntityMeta {
    /// Starts a declaration; the table name defaults to the lowercased type name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: name.to_lowercase(),
            primary_keys: Vec::new(),
            version_field: None,
            id_strategy: IdStrategy::default(),
            properties: Vec::new(),
        }
    }

    /// Sets the storage name.
    #[must_use]
    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Adds a primary key field (scalar unless already declared as a relation).
    #[must_use]
    pub fn primary_key(mut self, field: &str) -> Self {
        self.primary_keys.push(field.to_string());
        self.ensure_scalar(field);
        self
    }

    /// Sets the key strategy.
    #[must_use]
    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Declares the version field.
    #[must_use]
    pub fn version(mut self, field: &str) -> Self {
        self.version_field = Some(field.to_string());
        self.ensure_scalar(field);
        self
    }

    /// Declares a scalar property.
    #[must_use]
    pub fn scalar(mut self, name: &str) -> Self {
        self.ensure_scalar(name);
        self
    }

    /// Declares a relation property.
    #[must_use]
    pub fn relation(mut self, name: &str, relation: RelationMeta) -> Self {
        self.properties.retain(|p| p.name != name);
        self.properties.push(PropertyMeta {
            name: name.to_string(),
            relation: Some(relation),
        });
        self
    }

    fn ensure_scalar(&mut self, name: &str) {
        if self.property(name).is_none() {
            self.properties.push(PropertyMeta {
                name: name.to_string(),
                relation: None,
            });
        }
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up a property or fails with `UnknownProperty`.
    pub fn try_property(&self, name: &str) -> CoreResult<&PropertyMeta> {
        self.property(name)
            .ok_or_else(|| CoreError::unknown_property(&self.name, name))
    }

    /// Looks up a relation property by name.
    #[must_use]
    pub fn relation_of(&self, name: &str) -> Option<&RelationMeta> {
        self.property(name).and_then(|p| p.relation.as_ref())
    }

    /// Relation properties in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationMeta)> {
        self.properties
            .iter()
            .filter_map(|p| p.relation.as_ref().map(|r| (p.name.as_str(), r)))
    }

    /// Properties stored in the entity's own row.
    pub fn persistable(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.properties.iter().filter(|p| p.is_persistable())
    }

    /// Returns true if `field` is part of the primary key.
    #[must_use]
    pub fn is_primary_key(&self, field: &str) -> bool {
        self.primary_keys.iter().any(|pk| pk == field)
    }
}

/// Registry of entity metadata.
#[derive(Debug, Default)]
pub struct MetadataStorage {
    entities: HashMap<String, Arc<EntityMeta>>,
    order: Vec<String>,
}

impl MetadataStorage {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an entity type.
    pub fn register(&mut self, meta: EntityMeta) -> &mut Self {
        if !self.entities.contains_key(&meta.name) {
            self.order.push(meta.name.clone());
        }
        self.entities.insert(meta.name.clone(), Arc::new(meta));
        self
    }

    /// Finds metadata by entity type name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<EntityMeta>> {
        self.entities.get(name).cloned()
    }

    /// Finds metadata or fails with `UnknownEntity`.
    pub fn get(&self, name: &str) -> CoreResult<Arc<EntityMeta>> {
        self.find(name).ok_or_else(|| CoreError::unknown_entity(name))
    }

    /// All entity types in registration order.
    pub fn all(&self) -> impl Iterator<Item = Arc<EntityMeta>> + '_ {
        self.order.iter().filter_map(|name| self.find(name))
    }

    /// Returns the property on the other side of a bidirectional relation.
    #[must_use]
    pub fn other_side(&self, relation: &RelationMeta) -> Option<(Arc<EntityMeta>, RelationMeta)> {
        let target = self.find(&relation.target)?;
        let other = target.relation_of(relation.other_side()?)?.clone();
        Some((target, other))
    }

    /// Returns true if `relation` is the inverse side of a many-to-many.
    #[must_use]
    pub fn is_many_to_many_inverse(&self, relation: &RelationMeta) -> bool {
        relation.kind == RelationKind::ToManyInverse
            && self
                .other_side(relation)
                .is_some_and(|(_, owner)| owner.kind == RelationKind::ToManyOwning)
    }

    /// Checks cross-type consistency of the registered metadata.
    pub fn validate(&self) -> CoreResult<()> {
        for meta in self.all() {
            if meta.primary_keys.is_empty() {
                return Err(CoreError::invalid_operation(format!(
                    "entity {} declares no primary key",
                    meta.name
                )));
            }
            for pk in &meta.primary_keys {
                meta.try_property(pk)?;
            }
            for (name, relation) in meta.relations() {
                let target = self.get(&relation.target)?;
                match relation.kind {
                    RelationKind::ToOneInverse | RelationKind::ToManyInverse => {
                        let mapped_by = relation.mapped_by.as_deref().ok_or_else(|| {
                            CoreError::invalid_operation(format!(
                                "inverse relation {}.{name} has no mapped_by",
                                meta.name
                            ))
                        })?;
                        let owner = target.relation_of(mapped_by).ok_or_else(|| {
                            CoreError::unknown_property(&target.name, mapped_by)
                        })?;
                        let expected = match relation.kind {
                            RelationKind::ToOneInverse => &[RelationKind::ToOneOwning][..],
                            _ => &[RelationKind::ToOneOwning, RelationKind::ToManyOwning][..],
                        };
                        if !expected.contains(&owner.kind) || owner.target != meta.name {
                            return Err(CoreError::invalid_operation(format!(
                                "{}.{name} is mapped by {}.{mapped_by}, not an owning side",
                                meta.name, target.name
                            )));
                        }
                    }
                    RelationKind::ToOneOwning | RelationKind::ToManyOwning => {
                        if let Some(inverse) = relation.inversed_by.as_deref() {
                            target.try_property(inverse)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

//! Relation mutation: field assignment, collection membership and
//! propagation to the other side of bidirectional relations.

use super::UnitOfWork;
use crate::driver::Driver;
use crate::entity::FieldValue;
use crate::error::{CoreError, CoreResult};
use crate::metadata::{EntityMeta, RelationKind, RelationMeta};
use crate::types::{CollectionId, EntityToken};
use crate::value::Value;
use tracing::trace;

impl<D: Driver> UnitOfWork<D> {
    /// Assigns a field, keeping both sides of bidirectional relations in sync.
    ///
    /// Scalars take a [`FieldValue::Value`]. To-one relations take an entity,
    /// a raw identifier or `Null`. To-many relations take an item list, which
    /// is diffed against the loaded collection.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProperty`, `NotAnEntity` for targets of the wrong
    /// type, and `InvalidOperation` for values of the wrong shape.
    pub fn set_field(
        &mut self,
        token: EntityToken,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> CoreResult<()> {
        let value = value.into();
        let meta = self.meta_of(token)?;
        let relation = meta.try_property(name)?.relation.clone();
        match relation {
            None => match value {
                FieldValue::Value(_) => {
                    self.graph.entity_mut(token)?.set(name, value);
                    Ok(())
                }
                _ => Err(CoreError::invalid_operation(format!(
                    "{}.{name} is a scalar property",
                    meta.name
                ))),
            },
            Some(relation) if relation.kind.is_to_one() => {
                self.set_to_one(token, &meta, name, &relation, value)
            }
            Some(relation) => self.set_to_many(token, &meta, name, &relation, value),
        }
    }

    fn set_to_one(
        &mut self,
        token: EntityToken,
        meta: &EntityMeta,
        name: &str,
        relation: &RelationMeta,
        value: FieldValue,
    ) -> CoreResult<()> {
        let new_target = match value {
            FieldValue::Entity(target) => {
                self.check_target(&meta.name, name, relation, target)?;
                Some(target)
            }
            FieldValue::Value(value) if value.is_null() => None,
            FieldValue::Value(value) => self.reference_by_value(&relation.target, &value)?,
            _ => {
                return Err(CoreError::invalid_operation(format!(
                    "{}.{name} is a to-one relation",
                    meta.name
                )))
            }
        };

        self.fix_up(token, name, relation)?;
        let old_target = self.graph.entity(token)?.reference(name);
        let entity = self.graph.entity_mut(token)?;
        match new_target {
            Some(target) => entity.set(name, FieldValue::Entity(target)),
            None => entity.set(name, FieldValue::Value(Value::Null)),
        }
        if old_target == new_target {
            return Ok(());
        }

        if self.config.propagate_relations {
            if let Some(old) = old_target {
                self.unlink_other_side(old, relation, token)?;
            }
            if let Some(new) = new_target {
                self.link_other_side(new, relation, token)?;
            }
        }
        if relation.orphan_removal {
            if let Some(old) = old_target {
                self.schedule_orphan_removal(old);
            }
        }
        if let Some(new) = new_target {
            self.cancel_orphan_removal(new);
        }
        Ok(())
    }

    fn set_to_many(
        &mut self,
        token: EntityToken,
        meta: &EntityMeta,
        name: &str,
        relation: &RelationMeta,
        value: FieldValue,
    ) -> CoreResult<()> {
        let items = match value {
            FieldValue::Items(items) => items,
            FieldValue::Collection(id) => {
                if self.graph.collection(id).is_none() {
                    return Err(CoreError::invalid_operation(format!(
                        "{id} is not a live collection"
                    )));
                }
                self.graph.entity_mut(token)?.set(name, value);
                return Ok(());
            }
            _ => {
                return Err(CoreError::invalid_operation(format!(
                    "{}.{name} is a to-many relation",
                    meta.name
                )))
            }
        };
        for item in &items {
            self.check_target(&meta.name, name, relation, *item)?;
        }

        self.fix_up(token, name, relation)?;
        if self.graph.entity(token)?.collection(name).is_none() {
            self.graph
                .entity_mut(token)?
                .set(name, FieldValue::Items(items));
            return Ok(());
        }

        let id = self.init_collection(token, name)?;
        let current = self
            .graph
            .collection(id)
            .map(|c| c.items().to_vec())
            .unwrap_or_default();
        let to_remove: Vec<_> = current.iter().filter(|t| !items.contains(t)).copied().collect();
        let to_add: Vec<_> = items.iter().filter(|t| !current.contains(t)).copied().collect();
        self.remove_from_collection(token, name, &to_remove)?;
        self.add_to_collection(token, name, &to_add)
    }

    /// Returns the members of a to-many relation.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotInitialized` if the collection was never loaded.
    pub fn collection_items(
        &self,
        owner: EntityToken,
        property: &str,
    ) -> CoreResult<Vec<EntityToken>> {
        let meta = self.meta_of(owner)?;
        self.to_many_relation(&meta, property)?;
        match self.graph.entity(owner)?.get(property) {
            Some(FieldValue::Collection(id)) => {
                self.require_initialized(*id, &meta.name, property)?;
                Ok(self
                    .graph
                    .collection(*id)
                    .map(|c| c.items().to_vec())
                    .unwrap_or_default())
            }
            Some(FieldValue::Items(items)) => Ok(items.clone()),
            _ => Ok(Vec::new()),
        }
    }

    /// Adds entities to a to-many relation.
    ///
    /// Adding cancels a pending orphan removal of the item.
    ///
    /// # Errors
    ///
    /// - `NotAnEntity` if an item is unknown or of the wrong type
    /// - `CollectionNotInitialized` if the collection was never loaded
    /// - `InverseCollectionModification` if an item's owning side of a
    ///   many-to-many cannot reflect the change
    pub fn add_to_collection(
        &mut self,
        owner: EntityToken,
        property: &str,
        items: &[EntityToken],
    ) -> CoreResult<()> {
        let (meta, relation, id) = self.prepare_collection_change(owner, property, items)?;
        for &item in items {
            let added = self
                .graph
                .collection_mut(id)
                .is_some_and(|c| c.add(item));
            self.cancel_orphan_removal(item);
            if added {
                trace!(owner = %meta.name, property, %item, "added to collection");
                if self.config.propagate_relations {
                    self.propagate_membership(owner, &relation, item, true)?;
                }
            }
        }
        Ok(())
    }

    /// Removes entities from a to-many relation.
    ///
    /// Removed items are scheduled for orphan removal when the relation
    /// declares it.
    ///
    /// # Errors
    ///
    /// Same as [`UnitOfWork::add_to_collection`].
    pub fn remove_from_collection(
        &mut self,
        owner: EntityToken,
        property: &str,
        items: &[EntityToken],
    ) -> CoreResult<()> {
        let (meta, relation, id) = self.prepare_collection_change(owner, property, items)?;
        for &item in items {
            let removed = self
                .graph
                .collection_mut(id)
                .is_some_and(|c| c.remove(item));
            if !removed {
                continue;
            }
            trace!(owner = %meta.name, property, %item, "removed from collection");
            if relation.orphan_removal {
                self.schedule_orphan_removal(item);
            }
            if self.config.propagate_relations {
                self.propagate_membership(owner, &relation, item, false)?;
            }
        }
        Ok(())
    }

    /// Validates a membership change and returns the collection to change.
    fn prepare_collection_change(
        &mut self,
        owner: EntityToken,
        property: &str,
        items: &[EntityToken],
    ) -> CoreResult<(std::sync::Arc<EntityMeta>, RelationMeta, CollectionId)> {
        let meta = self.meta_of(owner)?;
        let relation = self.to_many_relation(&meta, property)?;
        for &item in items {
            self.check_target(&meta.name, property, &relation, item)?;
        }

        let id = self.ensure_collection(owner, property, &relation)?;
        self.require_initialized(id, &meta.name, property)?;

        if self.metadata.is_many_to_many_inverse(&relation) {
            let owning = self
                .metadata
                .other_side(&relation)
                .map(|(_, owning)| owning)
                .ok_or_else(|| CoreError::unknown_property(&relation.target, property))?;
            let owning_property = relation.mapped_by.clone().unwrap_or_default();
            for &item in items {
                let owning_id = self.ensure_collection(item, &owning_property, &owning)?;
                if !self.graph.collection(owning_id).is_some_and(|c| c.is_initialized()) {
                    return Err(CoreError::InverseCollectionModification {
                        entity_name: meta.name.clone(),
                        property: property.to_string(),
                    });
                }
            }
        }
        Ok((meta, relation, id))
    }

    fn to_many_relation(&self, meta: &EntityMeta, property: &str) -> CoreResult<RelationMeta> {
        meta.try_property(property)?;
        meta.relation_of(property)
            .filter(|r| r.kind.is_to_many())
            .cloned()
            .ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "{}.{property} is not a to-many relation",
                    meta.name
                ))
            })
    }

    /// Returns the collection held by a to-many field, creating it if absent.
    ///
    /// A new entity gets an empty initialized collection; a persisted one
    /// gets an uninitialized collection that must be loaded first.
    fn ensure_collection(
        &mut self,
        owner: EntityToken,
        property: &str,
        relation: &RelationMeta,
    ) -> CoreResult<CollectionId> {
        self.fix_up(owner, property, relation)?;
        if let Some(id) = self.graph.entity(owner)?.collection(property) {
            return Ok(id);
        }
        let id = if self.is_persisted(owner) {
            self.graph.new_collection(owner, property)
        } else {
            self.wrap_items(owner, property, Vec::new())
        };
        self.graph
            .entity_mut(owner)?
            .set(property, FieldValue::Collection(id));
        Ok(id)
    }

    fn require_initialized(
        &self,
        id: CollectionId,
        entity_name: &str,
        property: &str,
    ) -> CoreResult<()> {
        if self.graph.collection(id).is_some_and(|c| c.is_initialized()) {
            Ok(())
        } else {
            Err(CoreError::CollectionNotInitialized {
                entity_name: entity_name.to_string(),
                property: property.to_string(),
            })
        }
    }

    /// Rejects tokens that are unknown or not of the relation's target type.
    fn check_target(
        &self,
        owner: &str,
        property: &str,
        relation: &RelationMeta,
        item: EntityToken,
    ) -> CoreResult<()> {
        let rejected = |value: String| CoreError::NotAnEntity {
            owner: owner.to_string(),
            property: property.to_string(),
            expected: relation.target.clone(),
            value,
        };
        match self.graph.get(item) {
            None => Err(rejected(item.to_string())),
            Some(entity) if entity.entity_name() != relation.target => {
                Err(rejected(format!("{} {item}", entity.entity_name())))
            }
            Some(_) => Ok(()),
        }
    }

    /// Mirrors a membership change of `owner`'s collection onto `item`.
    fn propagate_membership(
        &mut self,
        owner: EntityToken,
        relation: &RelationMeta,
        item: EntityToken,
        added: bool,
    ) -> CoreResult<()> {
        let (Some(other_property), Some((_, other))) =
            (relation.other_side(), self.metadata.other_side(relation))
        else {
            return Ok(());
        };
        match other.kind {
            RelationKind::ToOneOwning => {
                let entity = self.graph.entity_mut(item)?;
                if added {
                    entity.set(other_property, FieldValue::Entity(owner));
                } else if !self.orphan_remove_stack.contains(item)
                    && entity.reference(other_property) == Some(owner)
                {
                    entity.set(other_property, FieldValue::Value(Value::Null));
                }
            }
            RelationKind::ToManyOwning | RelationKind::ToManyInverse => {
                self.mirror_membership(item, other_property, &other, owner, added)?;
            }
            RelationKind::ToOneInverse => {}
        }
        Ok(())
    }

    /// Adds `token` to the other side of an owning to-one relation pointing at `target`.
    fn link_other_side(
        &mut self,
        target: EntityToken,
        relation: &RelationMeta,
        token: EntityToken,
    ) -> CoreResult<()> {
        let (Some(other_property), Some((_, other))) =
            (relation.other_side(), self.metadata.other_side(relation))
        else {
            return Ok(());
        };
        match other.kind {
            RelationKind::ToManyInverse | RelationKind::ToManyOwning => {
                self.mirror_membership(target, other_property, &other, token, true)
            }
            RelationKind::ToOneInverse | RelationKind::ToOneOwning => {
                self.graph
                    .entity_mut(target)?
                    .set(other_property, FieldValue::Entity(token));
                Ok(())
            }
        }
    }

    /// Removes `token` from the other side of a to-one relation that used to point at `target`.
    fn unlink_other_side(
        &mut self,
        target: EntityToken,
        relation: &RelationMeta,
        token: EntityToken,
    ) -> CoreResult<()> {
        let (Some(other_property), Some((_, other))) =
            (relation.other_side(), self.metadata.other_side(relation))
        else {
            return Ok(());
        };
        match other.kind {
            RelationKind::ToManyInverse | RelationKind::ToManyOwning => {
                self.mirror_membership(target, other_property, &other, token, false)
            }
            RelationKind::ToOneInverse | RelationKind::ToOneOwning => {
                let entity = self.graph.entity_mut(target)?;
                if entity.reference(other_property) == Some(token) {
                    entity.set(other_property, FieldValue::Value(Value::Null));
                }
                Ok(())
            }
        }
    }

    /// Adds or removes `member` in `holder`'s collection, if it is loaded.
    fn mirror_membership(
        &mut self,
        holder: EntityToken,
        property: &str,
        relation: &RelationMeta,
        member: EntityToken,
        added: bool,
    ) -> CoreResult<()> {
        if !self.graph.entity(holder)?.is_initialized() {
            return Ok(());
        }
        let id = self.ensure_collection(holder, property, relation)?;
        if let Some(collection) = self.graph.collection_mut(id) {
            if collection.is_initialized() {
                if added {
                    collection.add(member);
                } else {
                    collection.remove(member);
                }
            }
        }
        Ok(())
    }
}

//! Loading rows into managed entities.
//!
//! Hydration is identity-preserving: a key already in the identity map
//! resolves to the same instance, and an initialized instance is never
//! overwritten by a later read.

use super::UnitOfWork;
use crate::driver::{Driver, DriverError, LockMode, Row};
use crate::entity::FieldValue;
use crate::error::{CoreError, CoreResult};
use crate::metadata::{EntityMeta, RelationKind};
use crate::types::{CollectionId, EntityToken};
use crate::value::{PrimaryKey, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace};

impl<D: Driver> UnitOfWork<D> {
    /// Returns the managed entity with the given key, reading it from the
    /// driver if it is not in the identity map.
    ///
    /// Lazy references are initialized. Returns `None` if no row exists.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown types or driver failures.
    pub fn load(&mut self, entity_name: &str, pk: &PrimaryKey) -> CoreResult<Option<EntityToken>> {
        self.metadata.get(entity_name)?;
        if let Some(token) = self.identity_map.get(entity_name, pk) {
            if !self.graph.entity(token)?.is_initialized() {
                self.init_entity(token)?;
            }
            return Ok(Some(token));
        }

        let row = self
            .driver
            .find_one(entity_name, pk, None, self.transaction.as_ref())?;
        row.map(|row| self.hydrate(entity_name, row)).transpose()
    }

    /// Loads an entity under a lock.
    ///
    /// Pessimistic modes read with a row lock inside the open transaction.
    /// The optimistic mode loads normally and checks that the type is versioned.
    ///
    /// # Errors
    ///
    /// Returns `TransactionRequired` for pessimistic modes outside a
    /// transaction, and `NotVersioned` for optimistic locks on unversioned types.
    pub fn load_locked(
        &mut self,
        entity_name: &str,
        pk: &PrimaryKey,
        mode: LockMode,
    ) -> CoreResult<Option<EntityToken>> {
        if !mode.is_pessimistic() {
            let token = self.load(entity_name, pk)?;
            if let Some(token) = token {
                self.lock(token, mode, None)?;
            }
            return Ok(token);
        }

        self.metadata.get(entity_name)?;
        let tx = self.transaction.as_ref().ok_or(CoreError::TransactionRequired)?;
        let row = self.driver.find_one(entity_name, pk, Some(mode), Some(tx))?;
        debug!(entity = entity_name, %pk, ?mode, "locked read");
        row.map(|row| self.hydrate(entity_name, row)).transpose()
    }

    /// Loads the state of a lazy reference.
    ///
    /// Does nothing for initialized entities.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` if the referenced row does not exist.
    pub fn init_entity(&mut self, token: EntityToken) -> CoreResult<()> {
        let meta = self.meta_of(token)?;
        let entity = self.graph.entity(token)?;
        if entity.is_initialized() {
            return Ok(());
        }
        let pk = self.key_of(entity, &meta).ok_or_else(|| {
            CoreError::invalid_operation(format!("reference {token} has no primary key"))
        })?;
        let row = self
            .driver
            .find_one(&meta.name, &pk, None, self.transaction.as_ref())?
            .ok_or_else(|| DriverError::RowNotFound {
                table: meta.table.clone(),
                key: pk.serialize(),
            })?;
        trace!(entity = %meta.name, %pk, "initializing reference");
        self.apply_row(token, &meta, row)
    }

    /// Loads the members of a to-many relation.
    ///
    /// Members already managed keep their instances. Returns the collection,
    /// creating it if the field held none.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProperty` if `property` is not a to-many relation.
    pub fn init_collection(
        &mut self,
        owner: EntityToken,
        property: &str,
    ) -> CoreResult<CollectionId> {
        let meta = self.meta_of(owner)?;
        let relation = meta
            .relation_of(property)
            .filter(|r| r.kind.is_to_many())
            .ok_or_else(|| CoreError::unknown_property(&meta.name, property))?
            .clone();
        if !self.graph.entity(owner)?.is_initialized() {
            self.init_entity(owner)?;
        }
        self.fix_up(owner, property, &relation)?;

        let id = match self.graph.entity(owner)?.collection(property) {
            Some(id) => id,
            None => {
                let id = self.graph.new_collection(owner, property);
                self.graph
                    .entity_mut(owner)?
                    .set(property, FieldValue::Collection(id));
                id
            }
        };
        if self.graph.collection(id).is_some_and(|c| c.is_initialized()) {
            return Ok(id);
        }

        let rows = match self.pk_of(owner) {
            Some(pk) => self.driver.find_collection(
                &meta.name,
                property,
                &pk,
                self.transaction.as_ref(),
            )?,
            None => Vec::new(),
        };
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(self.hydrate(&relation.target, row)?);
        }
        trace!(owner = %meta.name, property, items = items.len(), "collection loaded");
        if let Some(collection) = self.graph.collection_mut(id) {
            collection.hydrate(items);
        }
        Ok(id)
    }

    /// Materializes a row as a managed entity.
    pub(crate) fn hydrate(&mut self, entity_name: &str, row: Row) -> CoreResult<EntityToken> {
        let meta = self.metadata.get(entity_name)?;
        let pk = PrimaryKey::composite(
            meta.primary_keys
                .iter()
                .map(|field| row.get(field).cloned().unwrap_or(Value::Null))
                .collect(),
        );
        if !pk.is_complete() {
            return Err(CoreError::invalid_operation(format!(
                "row of {entity_name} has no complete primary key"
            )));
        }

        let token = match self.identity_map.get(entity_name, &pk) {
            Some(token) if self.graph.entity(token)?.is_initialized() => return Ok(token),
            Some(token) => token,
            None => self.graph.insert(entity_name, false, BTreeMap::new()),
        };
        self.apply_row(token, &meta, row)?;
        Ok(token)
    }

    /// Fills an uninitialized instance from a row and registers it.
    fn apply_row(&mut self, token: EntityToken, meta: &EntityMeta, row: Row) -> CoreResult<()> {
        let mut fields = Vec::with_capacity(meta.properties.len());
        for property in &meta.properties {
            let value = match &property.relation {
                None => FieldValue::Value(row.get(&property.name).cloned().unwrap_or(Value::Null)),
                Some(relation) if relation.kind == RelationKind::ToOneOwning => {
                    match row.get(&property.name) {
                        Some(value) if !value.is_null() => {
                            match self.reference_by_value(&relation.target, value)? {
                                Some(target) => FieldValue::Entity(target),
                                None => FieldValue::Value(Value::Null),
                            }
                        }
                        _ => FieldValue::Value(Value::Null),
                    }
                }
                Some(relation) if relation.kind.is_to_many() => {
                    FieldValue::Collection(self.graph.new_collection(token, &property.name))
                }
                Some(_) => continue,
            };
            fields.push((property.name.as_str(), value));
        }

        let entity = self.graph.entity_mut(token)?;
        for (name, value) in fields {
            entity.set(name, value);
        }
        entity.set_initialized(true);
        self.register(token, true)
    }
}

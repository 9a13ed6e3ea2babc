//! The unit of work.
//!
//! A [`UnitOfWork`] owns a working set of entities, tracks their identity
//! and baseline state, and turns the difference between live and baseline
//! state into ordered writes on `commit()`.
//!
//! # Lifecycle of one commit
//!
//! 1. Pending persists and removes cascade over the reachable graph
//! 2. Change sets are computed by diffing live state against snapshots
//! 3. Entity types are ordered by foreign-key direction
//! 4. Change sets are applied, forward references deferred to extra updates
//! 5. Extra updates and dirty collections are written
//! 6. Per-cycle state is discarded, whatever the outcome
//!
//! A unit of work is single-flow: callers serialize access to one instance.

mod cascade;
mod collections;
mod commit;
mod discovery;
mod hydrate;
mod lock;
mod stack;

use crate::change_set::{ChangeSet, EntityData};
use crate::config::UnitOfWorkConfig;
use crate::driver::{Driver, Transaction};
use crate::entity::{Entity, EntityGraph, FieldValue};
use crate::error::{CoreError, CoreResult};
use crate::events::{EventManager, EventSubscriber};
use crate::metadata::{EntityMeta, MetadataStorage};
use crate::registry::IdentityMap;
use crate::stats::UnitOfWorkStats;
use crate::types::EntityToken;
use crate::value::{PrimaryKey, Value};
use cascade::CascadeOp;
use commit::CommitCycle;
use stack::TokenStack;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// A deferred field assignment applied after the main write pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraUpdate {
    /// Entity receiving the assignment.
    pub entity: EntityToken,
    /// Property to assign.
    pub property: String,
    /// Value to assign.
    pub value: FieldValue,
}

/// Deferred identifier of an entity whose key the store will generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierPlaceholder {
    /// The entity awaiting its key.
    pub entity: EntityToken,
    /// The key, once the insert has completed.
    pub value: Option<PrimaryKey>,
}

/// Lookup criteria for [`UnitOfWork::try_get_by_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criteria {
    /// A bare key value; an array for composite keys.
    Key(Value),
    /// Field conditions; the key is taken from the primary-key fields.
    Fields(BTreeMap<String, Value>),
}

impl From<Value> for Criteria {
    fn from(value: Value) -> Self {
        Criteria::Key(value)
    }
}

impl From<i64> for Criteria {
    fn from(value: i64) -> Self {
        Criteria::Key(Value::Integer(value))
    }
}

impl From<&str> for Criteria {
    fn from(value: &str) -> Self {
        Criteria::Key(Value::from(value))
    }
}

impl From<BTreeMap<String, Value>> for Criteria {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Criteria::Fields(fields)
    }
}

impl Criteria {
    /// Extracts a complete primary key, if the criteria pin one down.
    #[must_use]
    pub fn primary_key(&self, meta: &EntityMeta) -> Option<PrimaryKey> {
        let parts = meta.primary_keys.len();
        let pk = match self {
            Criteria::Key(Value::Array(items)) if parts > 1 => {
                (items.len() == parts).then(|| PrimaryKey::composite(items.clone()))?
            }
            Criteria::Key(Value::Array(_)) => return None,
            Criteria::Key(value) if parts == 1 => PrimaryKey::single(value.clone()),
            Criteria::Key(_) => return None,
            Criteria::Fields(fields) => PrimaryKey::composite(
                meta.primary_keys
                    .iter()
                    .map(|field| fields.get(field).cloned())
                    .collect::<Option<Vec<_>>>()?,
            ),
        };
        pk.is_complete().then_some(pk)
    }
}

/// Tracks a working set of entities and synchronizes it with a driver.
pub struct UnitOfWork<D: Driver> {
    driver: Arc<D>,
    metadata: Arc<MetadataStorage>,
    config: UnitOfWorkConfig,
    graph: EntityGraph,
    identity_map: IdentityMap,
    snapshots: HashMap<EntityToken, EntityData>,
    identifiers: HashMap<EntityToken, IdentifierPlaceholder>,
    persist_stack: TokenStack,
    remove_stack: TokenStack,
    orphan_remove_stack: TokenStack,
    change_sets: Vec<ChangeSet>,
    extra_updates: Vec<ExtraUpdate>,
    cycle: CommitCycle,
    transaction: Option<Transaction>,
    events: EventManager,
    stats: UnitOfWorkStats,
}

impl<D: Driver> std::fmt::Debug for UnitOfWork<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("entities", &self.graph.len())
            .field("managed", &self.identity_map.len())
            .field("persist_stack", &self.persist_stack.len())
            .field("remove_stack", &self.remove_stack.len())
            .field("in_transaction", &self.transaction.is_some())
            .finish()
    }
}

impl<D: Driver> UnitOfWork<D> {
    /// Creates a unit of work with the default configuration.
    pub fn new(driver: Arc<D>, metadata: Arc<MetadataStorage>) -> Self {
        Self::with_config(driver, metadata, UnitOfWorkConfig::default())
    }

    /// Creates a unit of work with a custom configuration.
    pub fn with_config(
        driver: Arc<D>,
        metadata: Arc<MetadataStorage>,
        config: UnitOfWorkConfig,
    ) -> Self {
        Self {
            driver,
            metadata,
            config,
            graph: EntityGraph::new(),
            identity_map: IdentityMap::new(),
            snapshots: HashMap::new(),
            identifiers: HashMap::new(),
            persist_stack: TokenStack::new(),
            remove_stack: TokenStack::new(),
            orphan_remove_stack: TokenStack::new(),
            change_sets: Vec::new(),
            extra_updates: Vec::new(),
            cycle: CommitCycle::default(),
            transaction: None,
            events: EventManager::new(),
            stats: UnitOfWorkStats::new(),
        }
    }

    /// Returns the driver.
    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Returns the metadata registry.
    pub fn metadata(&self) -> &Arc<MetadataStorage> {
        &self.metadata
    }

    /// Returns the configuration.
    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    /// Returns the cumulative statistics.
    pub fn stats(&self) -> &UnitOfWorkStats {
        &self.stats
    }

    /// Registers a lifecycle event subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.events.subscribe(subscriber);
    }

    /// Returns the entity arena.
    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    // === Working set ===

    /// Creates a new, unmanaged entity instance.
    ///
    /// The instance is written on the next commit once it is persisted,
    /// directly or by cascade.
    ///
    /// # Errors
    ///
    /// Returns an error if the type or a property is unknown.
    pub fn create<I, K, V>(&mut self, entity_name: &str, fields: I) -> CoreResult<EntityToken>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let meta = self.metadata.get(entity_name)?;
        let mut data = BTreeMap::new();
        for (name, value) in fields {
            let name = name.into();
            meta.try_property(&name)?;
            data.insert(name, value.into());
        }
        let token = self.graph.insert(entity_name, true, data);
        trace!(entity = entity_name, %token, "created entity");
        Ok(token)
    }

    /// Returns a reference to the entity with the given key without loading it.
    ///
    /// The reference is registered in the identity map and stays
    /// uninitialized until loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or the key is incomplete.
    pub fn reference(&mut self, entity_name: &str, pk: &PrimaryKey) -> CoreResult<EntityToken> {
        let meta = self.metadata.get(entity_name)?;
        if !pk.is_complete() || pk.parts().len() != meta.primary_keys.len() {
            return Err(CoreError::invalid_operation(format!(
                "incomplete primary key {pk} for {entity_name}"
            )));
        }
        if let Some(token) = self.identity_map.get(entity_name, pk) {
            return Ok(token);
        }
        let token = self.graph.insert(entity_name, false, BTreeMap::new());
        self.graph.entity_mut(token)?.assign_primary_key(&meta, pk);
        self.identity_map.store(entity_name, pk, token);
        Ok(token)
    }

    /// Returns an entity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownToken` for a token not issued by this unit of work.
    pub fn entity(&self, token: EntityToken) -> CoreResult<&Entity> {
        self.graph.entity(token)
    }

    /// Returns a field of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tokens or properties.
    pub fn field(&self, token: EntityToken, name: &str) -> CoreResult<Option<&FieldValue>> {
        let entity = self.graph.entity(token)?;
        self.meta_of(token)?.try_property(name)?;
        Ok(entity.get(name))
    }

    /// Returns a scalar field of an entity, or `Null` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tokens or properties.
    pub fn value(&self, token: EntityToken, name: &str) -> CoreResult<Value> {
        Ok(self
            .field(token, name)?
            .and_then(FieldValue::as_value)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Returns the primary key of an entity, if assigned.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tokens.
    pub fn primary_key(&self, token: EntityToken) -> CoreResult<Option<PrimaryKey>> {
        let meta = self.meta_of(token)?;
        Ok(self.key_of(self.graph.entity(token)?, &meta))
    }

    /// Returns the baseline snapshot of an entity, if it has one.
    pub fn snapshot(&self, token: EntityToken) -> Option<&EntityData> {
        self.snapshots.get(&token)
    }

    /// Returns true if the entity is registered in the identity map.
    pub fn is_managed(&self, token: EntityToken) -> bool {
        self.identity_map.contains(token)
    }

    /// Returns true if the entity is scheduled for deletion.
    pub fn is_scheduled_for_removal(&self, token: EntityToken) -> bool {
        self.remove_stack.contains(token) || self.orphan_remove_stack.contains(token)
    }

    // === Identity ===

    /// Looks up a managed entity by key.
    pub fn get_by_id(&self, entity_name: &str, pk: &PrimaryKey) -> Option<EntityToken> {
        self.identity_map.get(entity_name, pk)
    }

    /// Looks up a managed entity from lookup criteria.
    ///
    /// Returns `None` if no key can be extracted or nothing is registered.
    pub fn try_get_by_id(
        &self,
        entity_name: &str,
        criteria: impl Into<Criteria>,
    ) -> Option<EntityToken> {
        let meta = self.metadata.find(entity_name)?;
        let pk = criteria.into().primary_key(&meta)?;
        self.get_by_id(entity_name, &pk)
    }

    /// Returns the identity map.
    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    /// Unregisters an entity and drops its snapshot and identifier placeholder.
    pub fn unset_identity(&mut self, token: EntityToken) {
        self.identity_map.remove(token);
        self.snapshots.remove(&token);
        self.identifiers.remove(&token);
    }

    /// Empties the identity map, snapshots and pending stacks.
    ///
    /// Entity tokens stay valid but their instances are no longer managed.
    /// The entity arena is not shrunk; only collections no owner field
    /// refers to are released. Use a fresh unit of work to drop instances.
    pub fn clear(&mut self) {
        debug!(managed = self.identity_map.len(), "clearing unit of work");
        self.identity_map.clear();
        self.snapshots.clear();
        self.identifiers.clear();
        self.persist_stack.clear();
        self.remove_stack.clear();
        self.orphan_remove_stack.clear();
        self.change_sets.clear();
        self.extra_updates.clear();
        self.cycle = CommitCycle::default();
        self.graph.release_detached_collections();
    }

    // === Operations ===

    /// Schedules an entity, and everything reachable through persist
    /// cascades, for writing on the next commit.
    ///
    /// Persisting an entity already scheduled is a no-op. Persisting an
    /// entity scheduled for removal cancels the removal.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tokens.
    pub fn persist(&mut self, token: EntityToken) -> CoreResult<()> {
        self.graph.entity(token)?;
        if self.persist_stack.contains(token) {
            return Ok(());
        }
        let mut visited = HashSet::new();
        self.cascade(token, CascadeOp::Persist, &mut visited, false)
    }

    /// Schedules an entity, and everything reachable through remove
    /// cascades, for deletion on the next commit.
    ///
    /// The entity leaves the identity map immediately.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tokens.
    pub fn remove(&mut self, token: EntityToken) -> CoreResult<()> {
        self.graph.entity(token)?;
        if self.remove_stack.contains(token) {
            return Ok(());
        }
        let mut visited = HashSet::new();
        self.cascade(token, CascadeOp::Remove, &mut visited, false)
    }

    /// Registers an entity as managed with its current state as baseline,
    /// cascading through merge-enabled relations.
    ///
    /// Entities without a primary key are not registered.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tokens.
    pub fn merge(&mut self, token: EntityToken) -> CoreResult<EntityToken> {
        self.graph.entity(token)?;
        let mut visited = HashSet::new();
        self.cascade(token, CascadeOp::Merge, &mut visited, false)?;
        Ok(token)
    }

    /// Schedules an entity for deletion as an orphan on the next commit.
    pub fn schedule_orphan_removal(&mut self, token: EntityToken) {
        trace!(%token, "scheduling orphan removal");
        self.orphan_remove_stack.insert(token);
    }

    /// Cancels a scheduled orphan removal.
    pub fn cancel_orphan_removal(&mut self, token: EntityToken) {
        self.orphan_remove_stack.remove(token);
    }

    // === Transactions ===

    /// Returns true while a caller-managed transaction is open.
    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Opens a caller-managed transaction. Commits run inside it.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open or the driver fails.
    pub fn begin_transaction(&mut self) -> CoreResult<()> {
        if self.transaction.is_some() {
            return Err(CoreError::invalid_operation("transaction already active"));
        }
        let tx = self.driver.begin()?;
        debug!(tx = %tx.id(), "transaction started");
        self.transaction = Some(tx);
        Ok(())
    }

    /// Commits pending changes, then the open transaction.
    ///
    /// If the unit of work or the driver fails to commit, the transaction
    /// is rolled back.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open, or the commit fails.
    pub fn commit_transaction(&mut self) -> CoreResult<()> {
        if self.transaction.is_none() {
            return Err(CoreError::TransactionRequired);
        }
        if let Err(err) = self.commit_cycle(true) {
            self.rollback_transaction()?;
            return Err(err);
        }
        let Some(mut tx) = self.transaction.take() else {
            return Err(CoreError::TransactionRequired);
        };
        if let Err(err) = self.driver.commit(&mut tx) {
            if tx.is_active() {
                let _ = self.driver.rollback(&mut tx);
            }
            return Err(err.into());
        }
        debug!(tx = %tx.id(), "transaction committed");
        Ok(())
    }

    /// Rolls back the open transaction.
    ///
    /// Entity state folded back by commits that succeeded inside the
    /// transaction is not reverted; `clear()` and reload to resynchronize.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or the driver fails.
    pub fn rollback_transaction(&mut self) -> CoreResult<()> {
        let Some(mut tx) = self.transaction.take() else {
            return Err(CoreError::TransactionRequired);
        };
        self.driver.rollback(&mut tx)?;
        debug!(tx = %tx.id(), "transaction rolled back");
        Ok(())
    }

    /// Runs `f` inside a caller-managed transaction, committing pending
    /// changes on success and rolling back on error.
    ///
    /// # Errors
    ///
    /// Returns the closure's error or a commit failure.
    pub fn transactional<T, F>(&mut self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Self) -> CoreResult<T>,
    {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit_transaction()?;
                Ok(value)
            }
            Err(err) => {
                // The closure's error wins over a failed rollback.
                let _ = self.rollback_transaction();
                Err(err)
            }
        }
    }

    // === Internal helpers ===

    pub(crate) fn meta_of(&self, token: EntityToken) -> CoreResult<Arc<EntityMeta>> {
        let entity = self.graph.entity(token)?;
        self.metadata.get(entity.entity_name())
    }

    pub(crate) fn pk_of(&self, token: EntityToken) -> Option<PrimaryKey> {
        let entity = self.graph.get(token)?;
        let meta = self.metadata.find(entity.entity_name())?;
        self.key_of(entity, &meta)
    }

    /// Extracts an entity's key, resolving key fields that reference another
    /// entity to that entity's key.
    pub(crate) fn key_of(&self, entity: &Entity, meta: &EntityMeta) -> Option<PrimaryKey> {
        entity.primary_key_with(meta, |target| {
            self.identifiers
                .get(&target)
                .and_then(|p| p.value.clone())
                .or_else(|| self.pk_of(target))
                .map(|pk| pk.to_value())
        })
    }

    /// True for entities known to exist in the store: loaded, merged, lazy
    /// references, and entities written earlier.
    pub(crate) fn is_persisted(&self, token: EntityToken) -> bool {
        self.pk_of(token).is_some()
            && (self.snapshots.contains_key(&token)
                || self.graph.get(token).is_some_and(|e| !e.is_initialized()))
    }

    /// Registers an entity under its current key, optionally refreshing its snapshot.
    pub(crate) fn register(&mut self, token: EntityToken, merge_data: bool) -> CoreResult<()> {
        let meta = self.meta_of(token)?;
        let entity = self.graph.entity(token)?;
        let Some(pk) = self.key_of(entity, &meta) else {
            return Ok(());
        };
        if merge_data && entity.is_initialized() {
            self.snapshots
                .insert(token, crate::change_set::entity_data(&meta, entity));
        }
        if let Some(previous) = self.identity_map.store(&meta.name, &pk, token) {
            debug!(entity = %meta.name, %pk, %previous, %token, "identity replaced");
        }
        Ok(())
    }

    /// Resolves a raw to-one identifier into a reference.
    pub(crate) fn reference_by_value(
        &mut self,
        target: &str,
        value: &Value,
    ) -> CoreResult<Option<EntityToken>> {
        let meta = self.metadata.get(target)?;
        match PrimaryKey::from_value(value, meta.primary_keys.len()) {
            Some(pk) => self.reference(target, &pk).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::IdStrategy;

    #[test]
    fn criteria_key_extraction() {
        let single = EntityMeta::new("Book").primary_key("id");
        assert_eq!(
            Criteria::from(5i64).primary_key(&single),
            Some(PrimaryKey::single(5))
        );
        assert_eq!(Criteria::Key(Value::Null).primary_key(&single), None);
        assert_eq!(
            Criteria::Key(Value::Array(vec![Value::Integer(1), Value::Integer(2)]))
                .primary_key(&single),
            None
        );

        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), Value::from("Dune"));
        assert_eq!(Criteria::from(fields.clone()).primary_key(&single), None);
        fields.insert("id".to_string(), Value::Integer(3));
        assert_eq!(
            Criteria::from(fields).primary_key(&single),
            Some(PrimaryKey::single(3))
        );

        let composite = EntityMeta::new("Edition")
            .primary_key("book")
            .primary_key("lang")
            .id_strategy(IdStrategy::Assigned);
        let key = Value::Array(vec![Value::Integer(1), Value::from("en")]);
        assert_eq!(
            Criteria::Key(key).primary_key(&composite).map(|pk| pk.serialize()),
            Some("1~~~en".to_string())
        );
        assert_eq!(Criteria::from(1i64).primary_key(&composite), None);
    }
}

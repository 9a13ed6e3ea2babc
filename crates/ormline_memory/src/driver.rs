//! The in-memory driver.

use crate::config::MemoryDriverConfig;
use crate::journal::{FailPoint, JournalEntry};
use crate::store::Store;
use ormline_core::{
    ChangeSet, ChangeSetType, CollectionSync, Driver, DriverError, DriverResult, EntityMeta,
    IdStrategy, LockMode, MetadataStorage, PrimaryKey, RelationKind, Row, Transaction,
    TransactionId, Value,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// A storage driver keeping rows in memory.
///
/// Each entity type has one table keyed by serialized primary key; owning
/// to-many relations are stored in pivot tables named `Owner.property`.
/// Transactions take a savepoint of every table on `begin` and restore it
/// on `rollback`. They are not isolated from each other.
///
/// # Thread Safety
///
/// The driver is thread-safe and can be shared between units of work.
#[derive(Debug)]
pub struct MemoryDriver {
    metadata: Arc<MetadataStorage>,
    config: MemoryDriverConfig,
    store: RwLock<Store>,
    savepoints: Mutex<HashMap<u64, Store>>,
    next_tx: AtomicU64,
    journal: Mutex<Vec<JournalEntry>>,
    fail_points: Mutex<Vec<FailPoint>>,
}

impl MemoryDriver {
    /// Creates a driver with the default configuration.
    #[must_use]
    pub fn new(metadata: Arc<MetadataStorage>) -> Self {
        Self::with_config(metadata, MemoryDriverConfig::default())
    }

    /// Creates a driver with a custom configuration.
    #[must_use]
    pub fn with_config(metadata: Arc<MetadataStorage>, config: MemoryDriverConfig) -> Self {
        Self {
            metadata,
            config,
            store: RwLock::new(Store::default()),
            savepoints: Mutex::new(HashMap::new()),
            next_tx: AtomicU64::new(0),
            journal: Mutex::new(Vec::new()),
            fail_points: Mutex::new(Vec::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &MemoryDriverConfig {
        &self.config
    }

    /// Makes the next matching operation fail with [`DriverError::Injected`].
    pub fn fail_on(&self, point: FailPoint) {
        debug!(%point, "fail point armed");
        self.fail_points.lock().push(point);
    }

    /// Returns the journal.
    #[must_use]
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().clone()
    }

    /// Empties the journal.
    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// Returns a row by primary key.
    #[must_use]
    pub fn row(&self, entity: &str, pk: &PrimaryKey) -> Option<Row> {
        self.store.read().get(entity, &pk.serialize()).cloned()
    }

    /// Returns all rows of an entity type in insertion order.
    #[must_use]
    pub fn rows(&self, entity: &str) -> Vec<Row> {
        self.store
            .read()
            .rows(entity)
            .into_iter()
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Returns the number of rows of an entity type.
    #[must_use]
    pub fn row_count(&self, entity: &str) -> usize {
        self.store.read().rows(entity).len()
    }

    /// Returns the (owner key, target key) pairs of an owning collection.
    #[must_use]
    pub fn pivot(&self, owner_entity: &str, property: &str) -> Vec<(String, String)> {
        self.store
            .read()
            .pivot(&pivot_name(owner_entity, property))
            .to_vec()
    }

    /// Returns the number of open transactions.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.savepoints.lock().len()
    }

    /// Inserts a row directly, bypassing the journal and fail points.
    ///
    /// Returns the row's primary key, generated if the type uses a
    /// generated strategy and the row has none.
    ///
    /// # Errors
    ///
    /// Returns the same constraint errors as an insert.
    pub fn seed(&self, entity: &str, mut row: Row) -> DriverResult<PrimaryKey> {
        let meta = self.meta(entity)?;
        let mut store = self.store.write();
        let pk = match key_of(&meta, &row) {
            Some(pk) => pk,
            None => {
                let pk = generate_key(&mut store, &meta)?;
                assign_key(&meta, &mut row, &pk);
                pk
            }
        };
        self.insert_row(&mut store, &meta, &pk, row)?;
        Ok(pk)
    }

    fn meta(&self, entity: &str) -> DriverResult<Arc<EntityMeta>> {
        self.metadata
            .find(entity)
            .ok_or_else(|| DriverError::other(format!("unknown entity type {entity}")))
    }

    fn record(&self, entry: JournalEntry) {
        if self.config.journal {
            self.journal.lock().push(entry);
        }
    }

    /// Fails if a fail point matching `point` is armed, disarming it.
    fn trip(&self, point: &FailPoint) -> DriverResult<()> {
        let mut points = self.fail_points.lock();
        match points.iter().position(|p| p == point) {
            Some(index) => {
                points.remove(index);
                debug!(%point, "fail point triggered");
                Err(DriverError::Injected(point.to_string()))
            }
            None => Ok(()),
        }
    }

    /// Checks that every owning to-one column of `row` references an existing row.
    fn check_foreign_keys(&self, store: &Store, meta: &EntityMeta, row: &Row) -> DriverResult<()> {
        if !self.config.enforce_foreign_keys {
            return Ok(());
        }
        for (name, relation) in meta.relations() {
            if relation.kind != RelationKind::ToOneOwning {
                continue;
            }
            let Some(value) = row.get(name).filter(|v| !v.is_null()) else {
                continue;
            };
            let target = self.meta(&relation.target)?;
            let exists = PrimaryKey::from_value(value, target.primary_keys.len())
                .is_some_and(|pk| store.contains(&target.name, &pk.serialize()));
            if !exists {
                return Err(DriverError::constraint(format!("fk_{}_{name}", meta.table)));
            }
        }
        Ok(())
    }

    /// Fails if an owning to-one column elsewhere still references `key`.
    fn check_not_referenced(
        &self,
        store: &Store,
        meta: &EntityMeta,
        key: &str,
    ) -> DriverResult<()> {
        if !self.config.enforce_foreign_keys {
            return Ok(());
        }
        for other in self.metadata.all() {
            for (name, relation) in other.relations() {
                if relation.kind != RelationKind::ToOneOwning || relation.target != meta.name {
                    continue;
                }
                for (row_key, row) in store.rows(&other.name) {
                    if other.name == meta.name && row_key == key {
                        continue;
                    }
                    let references = row
                        .get(name)
                        .and_then(|v| PrimaryKey::from_value(v, meta.primary_keys.len()))
                        .is_some_and(|pk| pk.serialize() == key);
                    if references {
                        return Err(DriverError::constraint(format!(
                            "fk_{}_{name}",
                            other.table
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_version(
        meta: &EntityMeta,
        stored: &Row,
        change_set: &ChangeSet,
        key: &str,
    ) -> DriverResult<()> {
        let (Some(expected), Some(field)) =
            (&change_set.version_check, meta.version_field.as_deref())
        else {
            return Ok(());
        };
        if stored.get(field) == Some(expected) {
            Ok(())
        } else {
            Err(DriverError::OptimisticLock {
                table: meta.table.clone(),
                key: key.to_string(),
            })
        }
    }

    fn insert_row(
        &self,
        store: &mut Store,
        meta: &EntityMeta,
        pk: &PrimaryKey,
        row: Row,
    ) -> DriverResult<()> {
        let key = pk.serialize();
        if store.contains(&meta.name, &key) {
            return Err(DriverError::UniqueViolation {
                table: meta.table.clone(),
                key,
            });
        }
        self.check_foreign_keys(store, meta, &row)?;
        store.observe_key(&meta.name, pk);
        store.put(&meta.name, key, row);
        Ok(())
    }

    fn insert(
        &self,
        store: &mut Store,
        meta: &EntityMeta,
        change_set: &ChangeSet,
        mut row: Row,
    ) -> DriverResult<Option<PrimaryKey>> {
        self.trip(&FailPoint::Insert(meta.name.clone()))?;
        let (pk, generated) = match change_set.primary_key.clone().or_else(|| key_of(meta, &row)) {
            Some(pk) => (pk, false),
            None => (generate_key(store, meta)?, true),
        };
        assign_key(meta, &mut row, &pk);
        self.insert_row(store, meta, &pk, row)?;
        trace!(entity = %meta.name, %pk, "insert");
        self.record(JournalEntry::Insert {
            entity: meta.name.clone(),
            key: pk.serialize(),
        });
        Ok(generated.then_some(pk))
    }

    fn update(
        &self,
        store: &mut Store,
        meta: &EntityMeta,
        change_set: &ChangeSet,
        row: Row,
    ) -> DriverResult<()> {
        self.trip(&FailPoint::Update(meta.name.clone()))?;
        let key = require_key(change_set)?.serialize();
        let stored = store.get(&meta.name, &key).ok_or_else(|| DriverError::RowNotFound {
            table: meta.table.clone(),
            key: key.clone(),
        })?;
        Self::check_version(meta, stored, change_set, &key)?;

        let fields: Vec<String> = row.keys().cloned().collect();
        let mut updated = stored.clone();
        updated.extend(row);
        self.check_foreign_keys(store, meta, &updated)?;
        trace!(entity = %meta.name, %key, ?fields, "update");
        store.put(&meta.name, key.clone(), updated);
        self.record(JournalEntry::Update {
            entity: meta.name.clone(),
            key,
            fields,
        });
        Ok(())
    }

    fn delete(
        &self,
        store: &mut Store,
        meta: &EntityMeta,
        change_set: &ChangeSet,
    ) -> DriverResult<()> {
        self.trip(&FailPoint::Delete(meta.name.clone()))?;
        let key = require_key(change_set)?.serialize();
        let stored = store.get(&meta.name, &key).ok_or_else(|| DriverError::RowNotFound {
            table: meta.table.clone(),
            key: key.clone(),
        })?;
        Self::check_version(meta, stored, change_set, &key)?;
        self.check_not_referenced(store, meta, &key)?;

        store.remove(&meta.name, &key);
        for other in self.metadata.all() {
            for (name, relation) in other.relations() {
                if relation.kind != RelationKind::ToManyOwning {
                    continue;
                }
                let collection = pivot_name(&other.name, name);
                if other.name == meta.name {
                    store.drop_pivot_rows(&collection, &key, true);
                }
                if relation.target == meta.name {
                    store.drop_pivot_rows(&collection, &key, false);
                }
            }
        }
        trace!(entity = %meta.name, %key, "delete");
        self.record(JournalEntry::Delete {
            entity: meta.name.clone(),
            key,
        });
        Ok(())
    }
}

impl Driver for MemoryDriver {
    fn supports_transactions(&self) -> bool {
        self.config.transactions
    }

    fn begin(&self) -> DriverResult<Transaction> {
        if !self.config.transactions {
            return Err(DriverError::other("transactions are disabled"));
        }
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst) + 1;
        let savepoint = self.store.read().clone();
        self.savepoints.lock().insert(id, savepoint);
        debug!(tx = id, "begin");
        self.record(JournalEntry::Begin { tx: id });
        Ok(Transaction::new(TransactionId::new(id)))
    }

    fn commit(&self, tx: &mut Transaction) -> DriverResult<()> {
        tx.ensure_active()?;
        self.trip(&FailPoint::Commit)?;
        let id = tx.id().get();
        self.savepoints.lock().remove(&id);
        tx.mark_committed();
        debug!(tx = id, "commit");
        self.record(JournalEntry::Commit { tx: id });
        Ok(())
    }

    fn rollback(&self, tx: &mut Transaction) -> DriverResult<()> {
        tx.ensure_active()?;
        let id = tx.id().get();
        if let Some(savepoint) = self.savepoints.lock().remove(&id) {
            *self.store.write() = savepoint;
        }
        tx.mark_aborted();
        debug!(tx = id, "rollback");
        self.record(JournalEntry::Rollback { tx: id });
        Ok(())
    }

    fn persist_change_set(
        &self,
        change_set: &ChangeSet,
        tx: Option<&Transaction>,
    ) -> DriverResult<Option<PrimaryKey>> {
        tx.map_or(Ok(()), Transaction::ensure_active)?;
        let meta = self.meta(&change_set.entity_name)?;
        let row = change_set.resolved_payload().ok_or_else(|| {
            DriverError::other(format!(
                "change set for {} carries an unresolved reference",
                change_set.entity_name
            ))
        })?;

        let mut store = self.store.write();
        match change_set.kind {
            ChangeSetType::Create => self.insert(&mut store, &meta, change_set, row),
            ChangeSetType::Update => self.update(&mut store, &meta, change_set, row).map(|()| None),
            ChangeSetType::Delete => self.delete(&mut store, &meta, change_set).map(|()| None),
        }
    }

    fn synchronize_collection(
        &self,
        sync: &CollectionSync,
        tx: Option<&Transaction>,
    ) -> DriverResult<()> {
        tx.map_or(Ok(()), Transaction::ensure_active)?;
        self.trip(&FailPoint::Synchronize(sync.owner_entity.clone()))?;
        let owner = self.meta(&sync.owner_entity)?;
        let collection = pivot_name(&sync.owner_entity, &sync.property);
        let owner_key = sync.owner_pk.serialize();

        let mut store = self.store.write();
        for pk in &sync.removed {
            let target = pk.serialize();
            if store.unlink(&collection, &owner_key, &target) {
                self.record(JournalEntry::Unlink {
                    collection: collection.clone(),
                    owner: owner_key.clone(),
                    target,
                });
            }
        }
        for pk in &sync.added {
            let target = pk.serialize();
            if self.config.enforce_foreign_keys
                && !(store.contains(&owner.name, &owner_key)
                    && store.contains(&sync.target_entity, &target))
            {
                return Err(DriverError::constraint(format!(
                    "fk_{}_{}",
                    owner.table, sync.property
                )));
            }
            if store.link(&collection, &owner_key, &target) {
                self.record(JournalEntry::Link {
                    collection: collection.clone(),
                    owner: owner_key.clone(),
                    target,
                });
            }
        }
        trace!(
            %collection,
            owner = %owner_key,
            added = sync.added.len(),
            removed = sync.removed.len(),
            "collection synchronized"
        );
        Ok(())
    }

    fn find_one(
        &self,
        entity_name: &str,
        pk: &PrimaryKey,
        lock: Option<LockMode>,
        tx: Option<&Transaction>,
    ) -> DriverResult<Option<Row>> {
        tx.map_or(Ok(()), Transaction::ensure_active)?;
        self.meta(entity_name)?;
        let key = pk.serialize();
        if let Some(mode) = lock.filter(|m| m.is_pessimistic()) {
            if tx.is_none() {
                return Err(DriverError::other("row locks require an active transaction"));
            }
            self.record(JournalEntry::Lock {
                entity: entity_name.to_string(),
                key: key.clone(),
                mode,
            });
        }
        Ok(self.store.read().get(entity_name, &key).cloned())
    }

    fn find_collection(
        &self,
        owner_entity: &str,
        property: &str,
        owner_pk: &PrimaryKey,
        tx: Option<&Transaction>,
    ) -> DriverResult<Vec<Row>> {
        tx.map_or(Ok(()), Transaction::ensure_active)?;
        let owner = self.meta(owner_entity)?;
        let relation = owner
            .relation_of(property)
            .ok_or_else(|| {
                DriverError::other(format!("unknown relation {owner_entity}.{property}"))
            })?;
        let owner_key = owner_pk.serialize();
        let store = self.store.read();

        let rows = match relation.kind {
            RelationKind::ToManyOwning => store
                .pivot(&pivot_name(owner_entity, property))
                .iter()
                .filter(|(o, _)| *o == owner_key)
                .filter_map(|(_, t)| store.get(&relation.target, t).cloned())
                .collect(),
            RelationKind::ToManyInverse => {
                let mapped_by = relation.mapped_by.as_deref().unwrap_or_default();
                let owning = self
                    .meta(&relation.target)?
                    .relation_of(mapped_by)
                    .map(|r| r.kind);
                match owning {
                    Some(RelationKind::ToOneOwning) => store
                        .rows(&relation.target)
                        .into_iter()
                        .filter(|(_, row)| {
                            row.get(mapped_by)
                                .and_then(|v| PrimaryKey::from_value(v, owner.primary_keys.len()))
                                .is_some_and(|pk| pk.serialize() == owner_key)
                        })
                        .map(|(_, row)| row.clone())
                        .collect(),
                    Some(RelationKind::ToManyOwning) => store
                        .pivot(&pivot_name(&relation.target, mapped_by))
                        .iter()
                        .filter(|(_, t)| *t == owner_key)
                        .filter_map(|(o, _)| store.get(&relation.target, o).cloned())
                        .collect(),
                    _ => {
                        return Err(DriverError::other(format!(
                            "{owner_entity}.{property} has no owning side"
                        )))
                    }
                }
            }
            _ => {
                return Err(DriverError::other(format!(
                    "{owner_entity}.{property} is not a to-many relation"
                )))
            }
        };
        Ok(rows)
    }
}

fn pivot_name(owner_entity: &str, property: &str) -> String {
    format!("{owner_entity}.{property}")
}

fn key_of(meta: &EntityMeta, row: &Row) -> Option<PrimaryKey> {
    let pk = PrimaryKey::composite(
        meta.primary_keys
            .iter()
            .map(|field| row.get(field).cloned().unwrap_or(Value::Null))
            .collect(),
    );
    pk.is_complete().then_some(pk)
}

fn assign_key(meta: &EntityMeta, row: &mut Row, pk: &PrimaryKey) {
    for (field, part) in meta.primary_keys.iter().zip(pk.parts()) {
        row.insert(field.clone(), part.clone());
    }
}

fn require_key(change_set: &ChangeSet) -> DriverResult<&PrimaryKey> {
    change_set.primary_key.as_ref().ok_or_else(|| {
        DriverError::other(format!(
            "{} change set for {} has no primary key",
            change_set.kind, change_set.entity_name
        ))
    })
}

fn generate_key(store: &mut Store, meta: &EntityMeta) -> DriverResult<PrimaryKey> {
    match meta.id_strategy {
        IdStrategy::Increment if meta.primary_keys.len() == 1 => {
            Ok(PrimaryKey::single(store.next_id(&meta.name)))
        }
        IdStrategy::Uuid if meta.primary_keys.len() == 1 => Ok(PrimaryKey::single(Uuid::new_v4())),
        _ => Err(DriverError::constraint(format!(
            "{}.{} not null",
            meta.table,
            meta.primary_keys.join(",")
        ))),
    }
}

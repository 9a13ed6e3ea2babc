//! Commit coordinator.
//!
//! Sequences one commit cycle: compute, order, open a transaction if
//! needed, apply change sets, drain extra updates, synchronize collections,
//! then discard the cycle's state. A failed cycle restores the baseline
//! of every write that did not stick and re-queues it for the next commit.

use super::{ExtraUpdate, UnitOfWork};
use crate::change_set::{diff, entity_data, ChangeSet, ChangeSetType, EntityData, PayloadValue};
use crate::commit_order::CommitOrderCalculator;
use crate::driver::{CollectionSync, Driver, Transaction};
use crate::entity::FieldValue;
use crate::error::{CoreError, CoreResult};
use crate::events::EventType;
use crate::metadata::{EntityMeta, RelationKind};
use crate::stats::CommitSummary;
use crate::types::{CollectionId, EntityToken};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Bookkeeping of the commit cycle in progress.
#[derive(Debug, Default)]
pub(crate) struct CommitCycle {
    /// Snapshot each entity had before this cycle touched it.
    pub(crate) snapshot_backups: HashMap<EntityToken, Option<EntityData>>,
    /// Entities with a CREATE change set not written yet.
    pending_creates: HashSet<EntityToken>,
    /// Writes the driver accepted, in order.
    applied: Vec<AppliedWrite>,
    /// Collections marked synchronized, with their previous state.
    synced: Vec<SyncedCollection>,
    /// Whether every accepted write was undone by a transaction rollback.
    rolled_back: bool,
}

#[derive(Debug)]
struct AppliedWrite {
    entity: EntityToken,
    kind: ChangeSetType,
    generated_key: bool,
    previous_version: Option<Option<FieldValue>>,
}

#[derive(Debug)]
struct SyncedCollection {
    id: CollectionId,
    snapshot: Vec<EntityToken>,
    dirty: bool,
}

/// Entities to schedule again after a failed cycle.
#[derive(Debug, Default)]
struct Requeue {
    persist: Vec<EntityToken>,
    remove: Vec<EntityToken>,
}

impl<D: Driver> UnitOfWork<D> {
    /// Writes every pending change.
    ///
    /// Runs inside the caller's transaction if one is open; otherwise opens
    /// one when the driver supports transactions and implicit transactions
    /// are enabled.
    ///
    /// # Errors
    ///
    /// Returns validation errors, hook errors and driver errors. On error
    /// the baseline of every write that did not stick is restored.
    pub fn commit(&mut self) -> CoreResult<CommitSummary> {
        self.commit_cycle(false)
    }

    /// Commits with knowledge of how a failure ends the caller's transaction.
    pub(crate) fn commit_cycle(&mut self, caller_rolls_back: bool) -> CoreResult<CommitSummary> {
        let result = self.run_commit(caller_rolls_back);
        let requeue = match &result {
            Ok(_) => Requeue::default(),
            Err(err) => {
                warn!(error = %err, "commit failed, restoring entity state");
                self.stats.record_failed_commit();
                self.restore_after_failure()
            }
        };
        self.reset_cycle();
        for token in requeue.persist {
            self.persist_stack.insert(token);
        }
        for token in requeue.remove {
            self.remove_stack.insert(token);
        }

        let summary = result?;
        let released = self.graph.release_detached_collections();
        if released > 0 {
            trace!(released, "released detached collections");
        }
        self.stats.record_commit();
        if summary.is_empty() {
            self.stats.record_empty_commit();
        }
        // Writes are applied at this point.
        if let Err(error) = self.events.dispatch_flush(EventType::AfterFlush, &[]) {
            warn!(%error, "after-flush subscriber failed");
        }
        Ok(summary)
    }

    fn run_commit(&mut self, caller_rolls_back: bool) -> CoreResult<CommitSummary> {
        self.events.dispatch_flush(EventType::BeforeFlush, &[])?;
        self.compute_change_sets()?;
        self.events
            .dispatch_flush(EventType::OnFlush, &self.change_sets)?;

        if self.change_sets.is_empty()
            && self.extra_updates.is_empty()
            && !self.has_dirty_collections()
        {
            debug!("nothing to commit");
            return Ok(CommitSummary::default());
        }

        let mut summary = CommitSummary {
            commit_order: self.order_change_sets(),
            ..CommitSummary::default()
        };

        if let Some(tx) = self.transaction.take() {
            let result = self.apply_all(Some(&tx), &mut summary);
            self.transaction = Some(tx);
            if result.is_err() && caller_rolls_back {
                self.cycle.rolled_back = true;
            }
            result?;
        } else if self.config.implicit_transactions && self.driver.supports_transactions() {
            let driver = Arc::clone(&self.driver);
            self.stats.record_transaction_open();
            summary.implicit_transaction = true;
            let result = driver.transactional(|tx| {
                debug!(tx = %tx.id(), "implicit transaction opened");
                self.apply_all(Some(tx), &mut summary)
            });
            if result.is_err() {
                self.cycle.rolled_back = true;
                self.stats.record_transaction_rollback();
            }
            result?;
        } else {
            self.apply_all(None, &mut summary)?;
        }

        debug!(
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            extra_updates = summary.extra_updates,
            collections = summary.collections_synchronized,
            "commit applied"
        );
        Ok(summary)
    }

    /// Sorts change sets by kind, then by commit order (reversed for
    /// deletes), keeping list position as tie-break. Returns the type order.
    fn order_change_sets(&mut self) -> Vec<String> {
        let mut types: Vec<&str> = Vec::new();
        for change_set in &self.change_sets {
            if !types.contains(&change_set.entity_name.as_str()) {
                types.push(&change_set.entity_name);
            }
        }
        let order = CommitOrderCalculator::for_types(&self.metadata, types).sort();

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let last = order.len().saturating_sub(1);
        self.change_sets.sort_by_key(|cs| {
            let p = position.get(cs.entity_name.as_str()).copied().unwrap_or(0);
            match cs.kind {
                ChangeSetType::Create => (0, p),
                ChangeSetType::Update => (1, p),
                ChangeSetType::Delete => (2, last - p),
            }
        });
        debug!(order = ?order, "commit order");
        order
    }

    fn apply_all(
        &mut self,
        tx: Option<&Transaction>,
        summary: &mut CommitSummary,
    ) -> CoreResult<()> {
        self.cycle.pending_creates = self
            .change_sets
            .iter()
            .filter(|cs| cs.kind == ChangeSetType::Create)
            .map(|cs| cs.entity)
            .collect();

        for index in 0..self.change_sets.len() {
            let change_set = self.change_sets[index].clone();
            let kind = change_set.kind;
            self.apply_change_set(change_set, tx)?;
            match kind {
                ChangeSetType::Create => summary.created += 1,
                ChangeSetType::Update => summary.updated += 1,
                ChangeSetType::Delete => summary.deleted += 1,
            }
        }

        while !self.extra_updates.is_empty() {
            let update = self.extra_updates.remove(0);
            self.apply_extra_update(update, tx)?;
            summary.extra_updates += 1;
        }

        summary.collections_synchronized = self.synchronize_collections(tx)?;
        Ok(())
    }

    /// Hands one change set to the driver and folds the result back.
    fn apply_change_set(
        &mut self,
        mut change_set: ChangeSet,
        tx: Option<&Transaction>,
    ) -> CoreResult<()> {
        let token = change_set.entity;
        let meta = self.metadata.get(&change_set.entity_name)?;

        if change_set.kind == ChangeSetType::Create {
            self.find_extra_updates(&meta, &mut change_set)?;
        }
        self.run_before_hook(&meta, &mut change_set)?;
        let (previous_version, next_version) = self.prepare_version(&meta, &mut change_set)?;
        self.resolve_references(&mut change_set)?;

        let generated = self.driver.persist_change_set(&change_set, tx)?;

        match change_set.kind {
            ChangeSetType::Create | ChangeSetType::Update => {
                let entity = self.graph.entity_mut(token)?;
                if let Some(pk) = &generated {
                    entity.assign_primary_key(&meta, pk);
                }
                if let (Some(field), Some(version)) =
                    (meta.version_field.as_deref(), next_version)
                {
                    entity.set(field, version);
                }
                let pk = self.pk_of(token);
                if let Some(placeholder) = self.identifiers.get_mut(&token) {
                    placeholder.value = pk;
                }
                self.cycle.pending_creates.remove(&token);
                self.register(token, true)?;
            }
            ChangeSetType::Delete => self.unset_identity(token),
        }

        self.cycle.applied.push(AppliedWrite {
            entity: token,
            kind: change_set.kind,
            generated_key: generated.is_some(),
            previous_version,
        });
        self.stats.record_change_set(change_set.kind);

        if self.events.has_entity_listeners(&meta.name) {
            let (_, after) = EventType::for_write(change_set.kind);
            self.events
                .dispatch_entity(after, self.graph.entity_mut(token)?, &change_set)?;
        }
        Ok(())
    }

    /// Strips references to entities whose CREATE has not been written yet
    /// and queues them as extra updates.
    fn find_extra_updates(
        &mut self,
        meta: &EntityMeta,
        change_set: &mut ChangeSet,
    ) -> CoreResult<()> {
        let references: Vec<(String, EntityToken)> = change_set
            .references()
            .map(|(property, target)| (property.to_string(), target))
            .collect();
        for (property, target) in references {
            let owning = meta
                .relation_of(&property)
                .is_some_and(|r| r.kind == RelationKind::ToOneOwning);
            if !owning || !self.cycle.pending_creates.contains(&target) {
                continue;
            }
            debug!(
                entity = %change_set.entity_name,
                property = %property,
                %target,
                "deferring forward reference"
            );
            change_set.payload.remove(&property);
            self.graph.entity_mut(change_set.entity)?.unset(&property);
            self.extra_updates.push(ExtraUpdate {
                entity: change_set.entity,
                property,
                value: FieldValue::Entity(target),
            });
        }
        Ok(())
    }

    /// Runs the `Before*` hook and folds the hook's field changes into the payload.
    fn run_before_hook(&mut self, meta: &EntityMeta, change_set: &mut ChangeSet) -> CoreResult<()> {
        if !self.events.has_entity_listeners(&meta.name) {
            return Ok(());
        }
        let token = change_set.entity;
        let (before, _) = EventType::for_write(change_set.kind);
        let data_before = entity_data(meta, self.graph.entity(token)?);
        self.events
            .dispatch_entity(before, self.graph.entity_mut(token)?, change_set)?;
        if change_set.kind == ChangeSetType::Delete {
            return Ok(());
        }

        let data_after = entity_data(meta, self.graph.entity(token)?);
        let changed = diff(&data_after, &data_before, |t| {
            self.pk_of(t).map(|pk| pk.to_value())
        });
        for name in changed {
            let value = match data_after.get(&name) {
                Some(FieldValue::Entity(target)) => PayloadValue::Reference(*target),
                Some(FieldValue::Value(value)) => PayloadValue::Value(value.clone()),
                _ => PayloadValue::Value(Value::Null),
            };
            change_set.payload.insert(name, value);
        }
        Ok(())
    }

    /// Stamps or increments the version of a versioned type.
    ///
    /// Returns the live version before the write and the one to store after it.
    fn prepare_version(
        &self,
        meta: &EntityMeta,
        change_set: &mut ChangeSet,
    ) -> CoreResult<(Option<Option<FieldValue>>, Option<Value>)> {
        let Some(field) = meta.version_field.as_deref() else {
            return Ok((None, None));
        };
        let current = self.graph.entity(change_set.entity)?.get(field).cloned();
        let current_value = current.as_ref().and_then(FieldValue::as_value).cloned();

        let next = match (change_set.kind, current_value) {
            (ChangeSetType::Delete, _) => return Ok((None, None)),
            (ChangeSetType::Create, Some(v)) if !v.is_null() => return Ok((None, None)),
            (ChangeSetType::Create, _) => Value::Integer(self.config.initial_version),
            (ChangeSetType::Update, Some(Value::Integer(n))) => {
                change_set.version_check = Some(Value::Integer(n));
                Value::Integer(n + 1)
            }
            (ChangeSetType::Update, _) => Value::Integer(self.config.initial_version),
        };
        change_set
            .payload
            .insert(field.to_string(), PayloadValue::Value(next.clone()));
        Ok((Some(current), Some(next)))
    }

    /// Replaces references in the payload with the referenced keys.
    fn resolve_references(&self, change_set: &mut ChangeSet) -> CoreResult<()> {
        let references: Vec<(String, EntityToken)> = change_set
            .references()
            .map(|(property, target)| (property.to_string(), target))
            .collect();
        for (property, target) in references {
            let pk = self
                .identifiers
                .get(&target)
                .and_then(|p| p.value.clone())
                .or_else(|| self.pk_of(target))
                .ok_or_else(|| CoreError::UnresolvedReference {
                    entity_name: change_set.entity_name.clone(),
                    property: property.clone(),
                    target,
                })?;
            change_set
                .payload
                .insert(property, PayloadValue::Value(pk.to_value()));
        }
        Ok(())
    }

    /// Applies one deferred assignment and writes the resulting difference.
    fn apply_extra_update(
        &mut self,
        update: ExtraUpdate,
        tx: Option<&Transaction>,
    ) -> CoreResult<()> {
        let ExtraUpdate {
            entity: token,
            property,
            value,
        } = update;
        if self.remove_stack.contains(token) {
            return Ok(());
        }
        self.graph.entity_mut(token)?.set(&property, value);
        self.stats.record_extra_update();

        let meta = self.meta_of(token)?;
        let entity = self.graph.entity(token)?;
        let current = entity_data(&meta, entity);
        let Some(baseline) = self.snapshots.get(&token) else {
            return Ok(());
        };
        let changed = diff(&current, baseline, |t| self.pk_of(t).map(|pk| pk.to_value()));
        if changed.is_empty() {
            return Ok(());
        }

        let mut change_set = ChangeSet::new(ChangeSetType::Update, &meta, token);
        change_set.primary_key = self.key_of(entity, &meta);
        for name in changed {
            let value = match current.get(&name) {
                Some(FieldValue::Entity(target)) => PayloadValue::Reference(*target),
                Some(FieldValue::Value(value)) => PayloadValue::Value(value.clone()),
                _ => PayloadValue::Value(Value::Null),
            };
            change_set.payload.insert(name, value);
        }
        debug!(entity = %meta.name, %token, property = %property, "extra update");
        self.apply_change_set(change_set, tx)
    }

    fn dirty_collections(&self) -> Vec<CollectionId> {
        self.graph
            .collections()
            .filter(|c| c.is_initialized() && c.is_dirty() && self.graph.is_attached(c))
            .map(|c| c.id())
            .collect()
    }

    /// True if an owning collection has membership changes to write.
    fn has_dirty_collections(&self) -> bool {
        self.dirty_collections().into_iter().any(|id| {
            self.graph.collection(id).is_some_and(|c| {
                self.meta_of(c.owner())
                    .ok()
                    .and_then(|meta| meta.relation_of(c.property()).map(|r| r.kind))
                    == Some(RelationKind::ToManyOwning)
            })
        })
    }

    /// Sends membership diffs of dirty owning collections to the driver.
    ///
    /// Inverse sides are written through their owning side and only reset here.
    fn synchronize_collections(&mut self, tx: Option<&Transaction>) -> CoreResult<usize> {
        let mut synchronized = 0;
        for id in self.dirty_collections() {
            let Some(collection) = self.graph.collection(id) else {
                continue;
            };
            let owner = collection.owner();
            let property = collection.property().to_string();
            let items = collection.items().to_vec();
            let removed = collection.removed();
            self.cycle.synced.push(SyncedCollection {
                id,
                snapshot: collection.snapshot().to_vec(),
                dirty: collection.is_dirty(),
            });

            let meta = self.meta_of(owner)?;
            let relation = meta.try_property(&property)?.relation.clone();
            let owning = relation
                .as_ref()
                .filter(|r| r.kind == RelationKind::ToManyOwning);

            if let (Some(relation), false) = (owning, self.remove_stack.contains(owner)) {
                let unresolved = |target| CoreError::UnresolvedReference {
                    entity_name: meta.name.clone(),
                    property: property.clone(),
                    target,
                };
                let owner_pk = self.pk_of(owner).ok_or_else(|| unresolved(owner))?;
                let added = self
                    .collection_added(id)
                    .into_iter()
                    .filter(|item| !self.remove_stack.contains(*item) && items.contains(item))
                    .map(|item| self.pk_of(item).ok_or_else(|| unresolved(item)))
                    .collect::<CoreResult<Vec<_>>>()?;
                let removed = removed.into_iter().filter_map(|item| self.pk_of(item)).collect();

                let sync = CollectionSync {
                    owner_entity: meta.name.clone(),
                    property: property.clone(),
                    owner_pk,
                    target_entity: relation.target.clone(),
                    added,
                    removed,
                };
                self.driver.synchronize_collection(&sync, tx)?;
                self.stats.record_collection_sync();
                synchronized += 1;
                debug!(owner = %meta.name, property = %property, "collection synchronized");
            }

            if let Some(collection) = self.graph.collection_mut(id) {
                collection.take_snapshot();
            }
        }
        Ok(synchronized)
    }

    fn collection_added(&self, id: CollectionId) -> Vec<EntityToken> {
        self.graph
            .collection(id)
            .map(|c| c.added())
            .unwrap_or_default()
    }

    /// Restores entity state after a failed cycle.
    fn restore_after_failure(&mut self) -> Requeue {
        let rolled_back = self.cycle.rolled_back;
        let applied = std::mem::take(&mut self.cycle.applied);
        let mut requeue = Requeue::default();

        let durable: HashSet<EntityToken> = if rolled_back {
            HashSet::new()
        } else {
            applied.iter().map(|w| w.entity).collect()
        };

        if rolled_back {
            for write in applied.iter().rev() {
                let meta = self.meta_of(write.entity).ok();
                let Ok(entity) = self.graph.entity_mut(write.entity) else {
                    continue;
                };
                if let (Some(meta), Some(previous)) = (&meta, &write.previous_version) {
                    if let Some(field) = meta.version_field.as_deref() {
                        match previous {
                            Some(value) => entity.set(field, value.clone()),
                            None => {
                                entity.unset(field);
                            }
                        }
                    }
                }
                if write.kind == ChangeSetType::Create && write.generated_key {
                    if let Some(meta) = &meta {
                        entity.clear_primary_key(meta);
                    }
                }
            }
            for synced in std::mem::take(&mut self.cycle.synced) {
                if let Some(collection) = self.graph.collection_mut(synced.id) {
                    collection.restore_snapshot(synced.snapshot, synced.dirty);
                }
            }
        }

        for update in std::mem::take(&mut self.extra_updates) {
            if let Ok(entity) = self.graph.entity_mut(update.entity) {
                entity.set(&update.property, update.value);
            }
        }

        let change_sets = std::mem::take(&mut self.change_sets);
        for change_set in &change_sets {
            let token = change_set.entity;
            if durable.contains(&token) {
                continue;
            }
            match self.cycle.snapshot_backups.get(&token).cloned().flatten() {
                Some(snapshot) => {
                    self.snapshots.insert(token, snapshot);
                }
                None => {
                    self.snapshots.remove(&token);
                }
            }
            match change_set.kind {
                ChangeSetType::Create => {
                    self.identity_map.remove(token);
                    requeue.persist.push(token);
                }
                ChangeSetType::Update => {}
                ChangeSetType::Delete => requeue.remove.push(token),
            }
        }
        warn!(
            rolled_back,
            change_sets = change_sets.len(),
            "entity state restored"
        );
        requeue
    }

    /// Discards all per-cycle state.
    fn reset_cycle(&mut self) {
        self.persist_stack.clear();
        self.remove_stack.clear();
        self.orphan_remove_stack.clear();
        self.change_sets.clear();
        self.identifiers.clear();
        self.extra_updates.clear();
        self.cycle = CommitCycle::default();
    }
}

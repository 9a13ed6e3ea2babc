//! Change-set computation.
//!
//! Cascades pending operations, rediscovers new entities reachable from
//! tracked ones and diffs every candidate against its baseline snapshot.

use super::cascade::CascadeOp;
use super::{ExtraUpdate, IdentifierPlaceholder, UnitOfWork};
use crate::change_set::{diff, entity_data, ChangeSet, ChangeSetType, PayloadValue};
use crate::driver::Driver;
use crate::entity::FieldValue;
use crate::error::CoreResult;
use crate::metadata::RelationKind;
use crate::types::EntityToken;
use crate::value::Value;
use std::collections::HashSet;
use tracing::{debug, trace};

/// A step of the explicit discovery walk.
enum Frame {
    /// First visit of an entity.
    Enter(EntityToken),
    /// Process the relation at `index`, then continue with the next one.
    Relation { entity: EntityToken, index: usize },
    /// All relations processed; compute the entity's change set.
    Exit(EntityToken),
}

impl<D: Driver> UnitOfWork<D> {
    /// Rebuilds the change-set list of the current cycle.
    pub(crate) fn compute_change_sets(&mut self) -> CoreResult<()> {
        self.change_sets.clear();

        let mut visited = HashSet::new();
        for token in self.remove_stack.to_vec() {
            self.cascade(token, CascadeOp::Remove, &mut visited, false)?;
        }

        visited.clear();
        for token in self.persist_stack.to_vec() {
            self.cascade(token, CascadeOp::Persist, &mut visited, true)?;
        }
        for token in self.identity_map.tokens() {
            if !self.is_scheduled_for_removal(token) {
                self.cascade(token, CascadeOp::Persist, &mut visited, true)?;
            }
        }

        visited.clear();
        while let Some(token) = self.persist_stack.first() {
            self.find_new_entities(token, &mut visited)?;
            self.persist_stack.remove(token);
        }

        for token in self.orphan_remove_stack.drain() {
            trace!(%token, "removing orphan");
            self.cascade(token, CascadeOp::Remove, &mut HashSet::new(), false)?;
        }

        for token in self.remove_stack.to_vec() {
            let meta = self.meta_of(token)?;
            let Some(pk) = self.pk_of(token) else {
                continue;
            };
            self.backup_snapshot(token);
            let mut change_set = ChangeSet::new(ChangeSetType::Delete, &meta, token);
            change_set.primary_key = Some(pk);
            if let Some(version) = meta.version_field.as_deref() {
                change_set.version_check = self
                    .snapshots
                    .get(&token)
                    .and_then(|s| s.get(version))
                    .and_then(FieldValue::as_value)
                    .filter(|v| !v.is_null())
                    .cloned();
            }
            self.change_sets.push(change_set);
        }

        debug!(
            change_sets = self.change_sets.len(),
            extra_updates = self.extra_updates.len(),
            "computed change sets"
        );
        Ok(())
    }

    /// Walks new and changed entities reachable from `root`, dependencies
    /// first, emitting a change set for every entity that differs from its
    /// snapshot.
    fn find_new_entities(
        &mut self,
        root: EntityToken,
        visited: &mut HashSet<EntityToken>,
    ) -> CoreResult<()> {
        let mut frames = vec![Frame::Enter(root)];
        while let Some(frame) = frames.pop() {
            match frame {
                Frame::Enter(token) => {
                    let entity = self.graph.entity(token)?;
                    if visited.contains(&token)
                        || !entity.is_initialized()
                        || self.is_scheduled_for_removal(token)
                    {
                        continue;
                    }
                    visited.insert(token);
                    if self.pk_of(token).is_none() {
                        self.identifiers
                            .entry(token)
                            .or_insert(IdentifierPlaceholder {
                                entity: token,
                                value: None,
                            });
                    }
                    frames.push(Frame::Relation {
                        entity: token,
                        index: 0,
                    });
                }
                Frame::Relation { entity, index } => {
                    let meta = self.meta_of(entity)?;
                    let Some((name, relation)) = meta.relations().nth(index) else {
                        frames.push(Frame::Exit(entity));
                        continue;
                    };
                    frames.push(Frame::Relation {
                        entity,
                        index: index + 1,
                    });
                    let children = self.discover_relation(entity, name, relation.kind, visited)?;
                    frames.extend(children.into_iter().rev().map(Frame::Enter));
                }
                Frame::Exit(token) => {
                    self.compute_change_set(token)?;
                    self.persist_stack.remove(token);
                }
            }
        }
        Ok(())
    }

    /// Returns the related entities discovery must visit before `token`.
    fn discover_relation(
        &mut self,
        token: EntityToken,
        property: &str,
        kind: RelationKind,
        visited: &HashSet<EntityToken>,
    ) -> CoreResult<Vec<EntityToken>> {
        let meta = self.meta_of(token)?;
        if let Some(relation) = meta.relation_of(property) {
            self.fix_up(token, property, relation)?;
        }

        match kind {
            RelationKind::ToOneOwning | RelationKind::ToOneInverse => {
                let target = self.graph.entity(token)?.reference(property);
                Ok(target
                    .filter(|t| {
                        self.graph.get(*t).is_some_and(|e| e.is_initialized())
                            && !self.snapshots.contains_key(t)
                    })
                    .into_iter()
                    .collect())
            }
            RelationKind::ToManyOwning | RelationKind::ToManyInverse => {
                let Some(id) = self.graph.entity(token)?.collection(property) else {
                    return Ok(Vec::new());
                };
                let Some(collection) = self.graph.collection(id) else {
                    return Ok(Vec::new());
                };
                if !collection.is_initialized() || !collection.is_dirty() {
                    return Ok(Vec::new());
                }
                let items = collection.items().to_vec();

                if kind == RelationKind::ToManyOwning && items.iter().any(|i| visited.contains(i)) {
                    // The collection closes a cycle: insert the owner with an
                    // empty collection and put the real one back afterwards.
                    trace!(%token, property, "deferring self-referencing collection");
                    self.extra_updates.push(ExtraUpdate {
                        entity: token,
                        property: property.to_string(),
                        value: FieldValue::Collection(id),
                    });
                    let empty = self.wrap_items(token, property, Vec::new());
                    self.graph
                        .entity_mut(token)?
                        .set(property, FieldValue::Collection(empty));
                }

                Ok(items
                    .into_iter()
                    .filter(|i| !visited.contains(i) && !self.snapshots.contains_key(i))
                    .collect())
            }
        }
    }

    /// Diffs one entity against its snapshot and appends its change set.
    fn compute_change_set(&mut self, token: EntityToken) -> CoreResult<()> {
        let meta = self.meta_of(token)?;
        let entity = self.graph.entity(token)?;
        let current = entity_data(&meta, entity);
        let pk = self.key_of(entity, &meta);
        let baseline = self.snapshots.get(&token);

        let (kind, changed) = match (baseline, &pk) {
            (Some(baseline), Some(_)) => {
                let changed = diff(&current, baseline, |t| self.pk_of(t).map(|pk| pk.to_value()));
                (ChangeSetType::Update, changed)
            }
            _ => (ChangeSetType::Create, current.keys().cloned().collect()),
        };

        if kind == ChangeSetType::Update && changed.is_empty() {
            return Ok(());
        }

        let mut change_set = ChangeSet::new(kind, &meta, token);
        change_set.primary_key = pk;
        for name in changed {
            let value = match current.get(&name) {
                Some(FieldValue::Entity(target)) => PayloadValue::Reference(*target),
                Some(FieldValue::Value(value)) => PayloadValue::Value(value.clone()),
                _ => PayloadValue::Value(Value::Null),
            };
            change_set.payload.insert(name, value);
        }
        trace!(%token, kind = %change_set.kind, entity = %meta.name, "change set");

        self.backup_snapshot(token);
        self.snapshots.insert(token, current);
        self.change_sets.push(change_set);
        Ok(())
    }

    /// Remembers the pre-cycle snapshot of an entity, once per cycle.
    pub(crate) fn backup_snapshot(&mut self, token: EntityToken) {
        let snapshot = self.snapshots.get(&token).cloned();
        self.cycle.snapshot_backups.entry(token).or_insert(snapshot);
    }
}

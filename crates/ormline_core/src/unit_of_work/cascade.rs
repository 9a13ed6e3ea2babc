//! Cascade walker.
//!
//! Applies persist, remove or merge to an entity and everything reachable
//! through relations that cascade the operation. The walk uses an explicit
//! work stack and a caller-owned `visited` set, so cyclic graphs terminate
//! and a node is processed once per top-level call.

use super::{IdentifierPlaceholder, UnitOfWork};
use crate::driver::Driver;
use crate::entity::FieldValue;
use crate::error::CoreResult;
use crate::metadata::{Cascade, RelationMeta};
use crate::types::{CollectionId, EntityToken};
use std::collections::HashSet;
use tracing::trace;

/// An operation the walker can apply to a single entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CascadeOp {
    Persist,
    Remove,
    Merge,
}

impl CascadeOp {
    /// The relation option that makes this operation follow a relation.
    const fn relation_option(self) -> Cascade {
        match self {
            Self::Persist => Cascade::Persist,
            Self::Remove => Cascade::Remove,
            Self::Merge => Cascade::Merge,
        }
    }
}

impl<D: Driver> UnitOfWork<D> {
    /// Walks the graph from `root` applying `op` to every eligible entity.
    pub(crate) fn cascade(
        &mut self,
        root: EntityToken,
        op: CascadeOp,
        visited: &mut HashSet<EntityToken>,
        check_remove_stack: bool,
    ) -> CoreResult<()> {
        let mut work = vec![root];
        while let Some(token) = work.pop() {
            if !visited.insert(token) {
                continue;
            }
            let proceed = match op {
                CascadeOp::Persist => self.persist_one(token, check_remove_stack)?,
                CascadeOp::Remove => {
                    self.remove_one(token);
                    true
                }
                CascadeOp::Merge => {
                    self.register(token, true)?;
                    true
                }
            };
            if !proceed {
                continue;
            }
            let targets = self.cascade_targets(token, op.relation_option())?;
            work.extend(targets.into_iter().rev());
        }
        Ok(())
    }

    /// Puts one entity on the persist stack.
    ///
    /// Returns false if the entity was skipped because it is scheduled for removal.
    fn persist_one(&mut self, token: EntityToken, check_remove_stack: bool) -> CoreResult<bool> {
        if check_remove_stack && self.is_scheduled_for_removal(token) {
            return Ok(false);
        }
        if self.persist_stack.contains(token) {
            return Ok(true);
        }
        if self.pk_of(token).is_none() {
            self.identifiers
                .entry(token)
                .or_insert(IdentifierPlaceholder {
                    entity: token,
                    value: None,
                });
        } else if self.snapshots.contains_key(&token) && !self.identity_map.contains(token) {
            // Re-persisting a removed entity makes it managed again.
            self.register(token, false)?;
        }
        trace!(%token, "persist");
        self.persist_stack.insert(token);
        self.remove_stack.remove(token);
        Ok(true)
    }

    /// Puts one entity on the remove stack and drops its identity.
    fn remove_one(&mut self, token: EntityToken) {
        if self.remove_stack.contains(token) {
            return;
        }
        if self.is_persisted(token) {
            trace!(%token, "remove");
            self.remove_stack.insert(token);
        }
        self.persist_stack.remove(token);
        self.identity_map.remove(token);
        self.identifiers.remove(&token);
        self.orphan_remove_stack.remove(token);
    }

    /// Fixes up every relation of `token`, then collects the entities `op`
    /// cascades to, in declaration order.
    fn cascade_targets(&mut self, token: EntityToken, op: Cascade) -> CoreResult<Vec<EntityToken>> {
        let meta = self.meta_of(token)?;
        let mut targets = Vec::new();
        for (name, relation) in meta.relations() {
            self.fix_up(token, name, relation)?;
            if relation.cascades(op) {
                targets.extend(self.graph.related(token, name));
            }
        }
        Ok(targets)
    }

    /// Normalizes raw relation values: a bare identifier on a to-one becomes
    /// a lazy reference, a raw item list on a to-many becomes a collection.
    pub(crate) fn fix_up(
        &mut self,
        token: EntityToken,
        property: &str,
        relation: &RelationMeta,
    ) -> CoreResult<()> {
        let current = self.graph.entity(token)?.get(property).cloned();
        match current {
            Some(FieldValue::Value(value)) if relation.kind.is_to_one() && !value.is_null() => {
                if let Some(reference) = self.reference_by_value(&relation.target, &value)? {
                    self.graph
                        .entity_mut(token)?
                        .set(property, FieldValue::Entity(reference));
                }
            }
            Some(FieldValue::Items(items)) if relation.kind.is_to_many() => {
                let id = self.wrap_items(token, property, items);
                self.graph
                    .entity_mut(token)?
                    .set(property, FieldValue::Collection(id));
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn wrap_items(
        &mut self,
        owner: EntityToken,
        property: &str,
        items: Vec<EntityToken>,
    ) -> CollectionId {
        let id = self.graph.new_collection(owner, property);
        if let Some(collection) = self.graph.collection_mut(id) {
            collection.seed(items);
        }
        id
    }
}

//! Change sets and baseline snapshots.

use crate::driver::Row;
use crate::entity::{Entity, FieldValue};
use crate::metadata::EntityMeta;
use crate::types::EntityToken;
use crate::value::{PrimaryKey, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of write a change set performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeSetType {
    /// Insert a new row.
    Create,
    /// Update changed fields of an existing row.
    Update,
    /// Delete a row by identity.
    Delete,
}

impl fmt::Display for ChangeSetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeSetType::Create => "CREATE",
            ChangeSetType::Update => "UPDATE",
            ChangeSetType::Delete => "DELETE",
        })
    }
}

/// A payload value; references resolve to the target's key right before
/// the write is handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadValue {
    /// A concrete value.
    Value(Value),
    /// The identifier of another entity, possibly not generated yet.
    Reference(EntityToken),
}

/// One entity's pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Kind of write.
    pub kind: ChangeSetType,
    /// Entity type name.
    pub entity_name: String,
    /// Storage name.
    pub table: String,
    /// Instance the write belongs to.
    pub entity: EntityToken,
    /// Changed fields only; empty for DELETE.
    pub payload: BTreeMap<String, PayloadValue>,
    /// Identity of the row, when known.
    pub primary_key: Option<PrimaryKey>,
    /// Version the update is based on, for versioned types.
    pub version_check: Option<Value>,
}

impl ChangeSet {
    /// Creates a change set with an empty payload.
    #[must_use]
    pub fn new(kind: ChangeSetType, meta: &EntityMeta, entity: EntityToken) -> Self {
        Self {
            kind,
            entity_name: meta.name.clone(),
            table: meta.table.clone(),
            entity,
            payload: BTreeMap::new(),
            primary_key: None,
            version_check: None,
        }
    }

    /// Returns the payload as concrete values, or `None` while any
    /// reference is unresolved.
    #[must_use]
    pub fn resolved_payload(&self) -> Option<Row> {
        self.payload
            .iter()
            .map(|(k, v)| match v {
                PayloadValue::Value(value) => Some((k.clone(), value.clone())),
                PayloadValue::Reference(_) => None,
            })
            .collect()
    }

    /// Entities referenced from the payload, by field.
    pub fn references(&self) -> impl Iterator<Item = (&str, EntityToken)> {
        self.payload.iter().filter_map(|(k, v)| match v {
            PayloadValue::Reference(t) => Some((k.as_str(), *t)),
            PayloadValue::Value(_) => None,
        })
    }
}

/// Baseline snapshot: persistable field values of one entity.
pub type EntityData = BTreeMap<String, FieldValue>;

/// Captures the persistable fields currently present on an entity.
#[must_use]
pub fn entity_data(meta: &EntityMeta, entity: &Entity) -> EntityData {
    meta.persistable()
        .filter_map(|prop| {
            entity
                .get(&prop.name)
                .filter(|v| matches!(v, FieldValue::Value(_) | FieldValue::Entity(_)))
                .map(|v| (prop.name.clone(), v.clone()))
        })
        .collect()
}

/// Names of fields whose values differ between `current` and `baseline`.
///
/// An absent field equals null. A reference equals a raw value when the
/// referenced entity's key (from `key_of`) is that value.
#[must_use]
pub fn diff<F>(current: &EntityData, baseline: &EntityData, key_of: F) -> Vec<String>
where
    F: Fn(EntityToken) -> Option<Value>,
{
    let names: BTreeSet<&String> = current.keys().chain(baseline.keys()).collect();
    names
        .into_iter()
        .filter(|name| !same_field(current.get(*name), baseline.get(*name), &key_of))
        .cloned()
        .collect()
}

fn same_field<F>(a: Option<&FieldValue>, b: Option<&FieldValue>, key_of: &F) -> bool
where
    F: Fn(EntityToken) -> Option<Value>,
{
    let null = FieldValue::Value(Value::Null);
    match (a.unwrap_or(&null), b.unwrap_or(&null)) {
        (FieldValue::Entity(x), FieldValue::Entity(y)) => {
            x == y || matches!((key_of(*x), key_of(*y)), (Some(kx), Some(ky)) if kx == ky)
        }
        (FieldValue::Entity(t), FieldValue::Value(v))
        | (FieldValue::Value(v), FieldValue::Entity(t)) => {
            !v.is_null() && key_of(*t).as_ref() == Some(v)
        }
        (x, y) => x == y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::RelationMeta;

    fn t(n: u64) -> EntityToken {
        EntityToken::new(n)
    }

    fn data(pairs: &[(&str, FieldValue)]) -> EntityData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let baseline = data(&[
            ("title", Value::from("Dune").into()),
            ("pages", Value::Integer(412).into()),
        ]);
        let current = data(&[
            ("title", Value::from("Dune Messiah").into()),
            ("pages", Value::Integer(412).into()),
        ]);
        assert_eq!(diff(&current, &baseline, |_| None), vec!["title"]);
    }

    #[test]
    fn absent_equals_null() {
        let baseline = data(&[("isbn", Value::Null.into())]);
        let current = data(&[]);
        assert!(diff(&current, &baseline, |_| None).is_empty());

        let current = data(&[("isbn", Value::from("x").into())]);
        assert_eq!(diff(&current, &baseline, |_| None), vec!["isbn"]);
    }

    #[test]
    fn references_compare_by_key() {
        let baseline = data(&[("author", Value::Integer(1).into())]);
        let current = data(&[("author", FieldValue::Entity(t(4)))]);
        let key_of = |token: EntityToken| (token == t(4)).then(|| Value::Integer(1));
        assert!(diff(&current, &baseline, key_of).is_empty());

        let moved = data(&[("author", FieldValue::Entity(t(5)))]);
        assert_eq!(diff(&moved, &baseline, key_of), vec!["author"]);
    }

    #[test]
    fn entity_data_keeps_persistable_fields() {
        let meta = EntityMeta::new("Book")
            .primary_key("id")
            .scalar("title")
            .relation("author", RelationMeta::to_one("Author"))
            .relation("tags", RelationMeta::to_many("Tag"));
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), FieldValue::Value(Value::from("Dune")));
        fields.insert("author".to_string(), FieldValue::Entity(t(1)));
        fields.insert("tags".to_string(), FieldValue::Items(vec![t(2)]));
        let entity = Entity::new(t(0), "Book", true, fields);

        let snapshot = entity_data(&meta, &entity);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("author"));
        assert!(!snapshot.contains_key("tags"));
    }

    #[test]
    fn resolved_payload_requires_values() {
        let meta = EntityMeta::new("Book").primary_key("id");
        let mut cs = ChangeSet::new(ChangeSetType::Create, &meta, t(0));
        cs.payload
            .insert("title".into(), PayloadValue::Value(Value::from("Dune")));
        assert_eq!(cs.resolved_payload().unwrap().len(), 1);

        cs.payload
            .insert("author".into(), PayloadValue::Reference(t(1)));
        assert!(cs.resolved_payload().is_none());
        assert_eq!(cs.references().collect::<Vec<_>>(), vec![("author", t(1))]);
        assert_eq!(cs.kind.to_string(), "CREATE");
    }
}

//! Table and pivot storage.

use ormline_core::{PrimaryKey, Row, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
struct StoredRow {
    seq: u64,
    row: Row,
}

/// Rows of one entity type keyed by serialized primary key.
#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<String, StoredRow>,
    next_id: i64,
}

/// All tables and pivot tables of a driver.
///
/// Cloning a store is how transactions take their savepoint.
#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    tables: HashMap<String, Table>,
    pivots: BTreeMap<String, Vec<(String, String)>>,
    seq: u64,
}

impl Store {
    pub(crate) fn contains(&self, entity: &str, key: &str) -> bool {
        self.tables
            .get(entity)
            .is_some_and(|t| t.rows.contains_key(key))
    }

    pub(crate) fn get(&self, entity: &str, key: &str) -> Option<&Row> {
        self.tables.get(entity)?.rows.get(key).map(|s| &s.row)
    }

    /// Inserts or replaces a row. A replaced row keeps its position.
    pub(crate) fn put(&mut self, entity: &str, key: String, row: Row) {
        self.seq += 1;
        let seq = self.seq;
        let table = self.tables.entry(entity.to_string()).or_default();
        match table.rows.get_mut(&key) {
            Some(stored) => stored.row = row,
            None => {
                table.rows.insert(key, StoredRow { seq, row });
            }
        }
    }

    pub(crate) fn remove(&mut self, entity: &str, key: &str) -> Option<Row> {
        self.tables
            .get_mut(entity)?
            .rows
            .remove(key)
            .map(|s| s.row)
    }

    /// Rows of a table in insertion order, with their keys.
    pub(crate) fn rows(&self, entity: &str) -> Vec<(&str, &Row)> {
        let Some(table) = self.tables.get(entity) else {
            return Vec::new();
        };
        let mut rows: Vec<_> = table.rows.iter().collect();
        rows.sort_by_key(|(_, stored)| stored.seq);
        rows.into_iter()
            .map(|(key, stored)| (key.as_str(), &stored.row))
            .collect()
    }

    /// Returns the next value of a table's increment counter.
    pub(crate) fn next_id(&mut self, entity: &str) -> i64 {
        let table = self.tables.entry(entity.to_string()).or_default();
        table.next_id += 1;
        table.next_id
    }

    /// Keeps the increment counter ahead of caller-assigned integer keys.
    pub(crate) fn observe_key(&mut self, entity: &str, pk: &PrimaryKey) {
        if let [Value::Integer(n)] = pk.parts() {
            let table = self.tables.entry(entity.to_string()).or_default();
            table.next_id = table.next_id.max(*n);
        }
    }

    pub(crate) fn link(&mut self, collection: &str, owner: &str, target: &str) -> bool {
        let pairs = self.pivots.entry(collection.to_string()).or_default();
        let pair = (owner.to_string(), target.to_string());
        if pairs.contains(&pair) {
            return false;
        }
        pairs.push(pair);
        true
    }

    pub(crate) fn unlink(&mut self, collection: &str, owner: &str, target: &str) -> bool {
        let Some(pairs) = self.pivots.get_mut(collection) else {
            return false;
        };
        let before = pairs.len();
        pairs.retain(|(o, t)| !(o == owner && t == target));
        pairs.len() != before
    }

    pub(crate) fn pivot(&self, collection: &str) -> &[(String, String)] {
        self.pivots.get(collection).map(Vec::as_slice).unwrap_or_default()
    }

    /// Drops pivot rows whose owner (`owner_side`) or target matches `key`.
    pub(crate) fn drop_pivot_rows(&mut self, collection: &str, key: &str, owner_side: bool) {
        if let Some(pairs) = self.pivots.get_mut(collection) {
            pairs.retain(|(o, t)| if owner_side { o != key } else { t != key });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: &str) -> Row {
        let mut row = Row::new();
        row.insert("title".to_string(), Value::from(title));
        row
    }

    #[test]
    fn rows_keep_insertion_order() {
        let mut store = Store::default();
        store.put("Book", "10".into(), row("b"));
        store.put("Book", "2".into(), row("a"));
        store.put("Book", "10".into(), row("c"));

        let rows = store.rows("Book");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "10");
        assert_eq!(rows[0].1.get("title"), Some(&Value::from("c")));
        assert_eq!(rows[1].0, "2");
    }

    #[test]
    fn increment_counter_skips_assigned_keys() {
        let mut store = Store::default();
        store.observe_key("Book", &PrimaryKey::single(5));
        assert_eq!(store.next_id("Book"), 6);
        assert_eq!(store.next_id("Author"), 1);
    }

    #[test]
    fn pivot_link_and_unlink() {
        let mut store = Store::default();
        assert!(store.link("Book.tags", "1", "7"));
        assert!(!store.link("Book.tags", "1", "7"));
        assert!(store.link("Book.tags", "2", "7"));
        assert_eq!(store.pivot("Book.tags").len(), 2);

        store.drop_pivot_rows("Book.tags", "7", false);
        assert!(store.pivot("Book.tags").is_empty());
        assert!(!store.unlink("Book.tags", "1", "7"));
    }
}

//! Operation journal and fault injection.

use ormline_core::LockMode;
use serde::Serialize;
use std::fmt;

/// One operation performed by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    /// A transaction was opened.
    Begin {
        /// Transaction ID.
        tx: u64,
    },
    /// A transaction was committed.
    Commit {
        /// Transaction ID.
        tx: u64,
    },
    /// A transaction was rolled back.
    Rollback {
        /// Transaction ID.
        tx: u64,
    },
    /// A row was inserted.
    Insert {
        /// Entity type.
        entity: String,
        /// Serialized primary key.
        key: String,
    },
    /// A row was updated.
    Update {
        /// Entity type.
        entity: String,
        /// Serialized primary key.
        key: String,
        /// Written fields.
        fields: Vec<String>,
    },
    /// A row was deleted.
    Delete {
        /// Entity type.
        entity: String,
        /// Serialized primary key.
        key: String,
    },
    /// A pivot row was inserted.
    Link {
        /// Collection, as `Owner.property`.
        collection: String,
        /// Serialized owner key.
        owner: String,
        /// Serialized target key.
        target: String,
    },
    /// A pivot row was deleted.
    Unlink {
        /// Collection, as `Owner.property`.
        collection: String,
        /// Serialized owner key.
        owner: String,
        /// Serialized target key.
        target: String,
    },
    /// A row was read under a lock.
    Lock {
        /// Entity type.
        entity: String,
        /// Serialized primary key.
        key: String,
        /// Requested lock mode.
        mode: LockMode,
    },
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalEntry::Begin { tx } => write!(f, "BEGIN tx:{tx}"),
            JournalEntry::Commit { tx } => write!(f, "COMMIT tx:{tx}"),
            JournalEntry::Rollback { tx } => write!(f, "ROLLBACK tx:{tx}"),
            JournalEntry::Insert { entity, key } => write!(f, "INSERT {entity} {key}"),
            JournalEntry::Update { entity, key, fields } => {
                write!(f, "UPDATE {entity} {key} [{}]", fields.join(", "))
            }
            JournalEntry::Delete { entity, key } => write!(f, "DELETE {entity} {key}"),
            JournalEntry::Link {
                collection,
                owner,
                target,
            } => write!(f, "LINK {collection} {owner} -> {target}"),
            JournalEntry::Unlink {
                collection,
                owner,
                target,
            } => write!(f, "UNLINK {collection} {owner} -> {target}"),
            JournalEntry::Lock { entity, key, mode } => write!(f, "LOCK {entity} {key} {mode:?}"),
        }
    }
}

/// An operation that fails once when it next runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    /// The next insert into the entity type.
    Insert(String),
    /// The next update of the entity type.
    Update(String),
    /// The next delete from the entity type.
    Delete(String),
    /// The next synchronization of a collection owned by the entity type.
    Synchronize(String),
    /// The next transaction commit.
    Commit,
}

impl fmt::Display for FailPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailPoint::Insert(entity) => write!(f, "insert into {entity}"),
            FailPoint::Update(entity) => write!(f, "update of {entity}"),
            FailPoint::Delete(entity) => write!(f, "delete from {entity}"),
            FailPoint::Synchronize(entity) => write!(f, "collection sync of {entity}"),
            FailPoint::Commit => write!(f, "commit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_display() {
        let entry = JournalEntry::Update {
            entity: "Book".into(),
            key: "1".into(),
            fields: vec!["title".into(), "version".into()],
        };
        assert_eq!(entry.to_string(), "UPDATE Book 1 [title, version]");
        assert_eq!(JournalEntry::Begin { tx: 3 }.to_string(), "BEGIN tx:3");
    }

    #[test]
    fn entries_serialize_tagged() {
        let entry = JournalEntry::Insert {
            entity: "Author".into(),
            key: "7".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["op"], "insert");
        assert_eq!(json["entity"], "Author");
    }
}

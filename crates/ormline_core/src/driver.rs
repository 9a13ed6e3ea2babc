//! Storage driver contract.
//!
//! The unit of work never talks to storage directly. It hands change sets,
//! collection diffs and lock reads to a [`Driver`], strictly one call at a
//! time and in commit order.
//!
//! # Invariants
//!
//! - `persist_change_set` returns the generated primary key for a CREATE of
//!   a type with a generated key strategy, and `None` otherwise
//! - writes made through an active [`Transaction`] are undone by `rollback`
//! - drivers are `Send + Sync`; interior mutability is the driver's concern

use crate::change_set::ChangeSet;
use crate::types::TransactionId;
use crate::value::{PrimaryKey, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// A stored row: field name to value.
pub type Row = BTreeMap<String, Value>;

/// Errors returned by storage drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A foreign-key or not-null constraint failed.
    #[error("constraint violation: {constraint}")]
    ConstraintViolation {
        /// The violated constraint.
        constraint: String,
    },

    /// A row with the same primary key already exists.
    #[error("unique violation on {table}: key {key}")]
    UniqueViolation {
        /// Table name.
        table: String,
        /// Serialized key.
        key: String,
    },

    /// The row to update or delete does not exist.
    #[error("row not found in {table}: key {key}")]
    RowNotFound {
        /// Table name.
        table: String,
        /// Serialized key.
        key: String,
    },

    /// The stored version differs from the version the update was based on.
    #[error("optimistic lock failed on {table}: key {key}")]
    OptimisticLock {
        /// Table name.
        table: String,
        /// Serialized key.
        key: String,
    },

    /// The transaction is not active.
    #[error("transaction {0} is not active")]
    TransactionInactive(TransactionId),

    /// An injected failure (testing).
    #[error("injected failure: {0}")]
    Injected(String),

    /// Any other driver failure.
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Creates a constraint violation error.
    pub fn constraint(constraint: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            constraint: constraint.into(),
        }
    }

    /// Creates a generic driver error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Lock mode for [`crate::UnitOfWork::lock`] and locked reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Version comparison only; no storage round trip unless the entity is unloaded.
    Optimistic,
    /// Shared row lock.
    PessimisticRead,
    /// Exclusive row lock.
    PessimisticWrite,
}

impl LockMode {
    /// Returns true for row-lock modes.
    #[must_use]
    pub const fn is_pessimistic(self) -> bool {
        !matches!(self, LockMode::Optimistic)
    }
}

/// State of a driver transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A driver transaction handle.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
}

impl Transaction {
    /// Creates an active transaction. Called by drivers from `begin`.
    #[must_use]
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Marks the transaction as committed.
    pub fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    /// Marks the transaction as aborted.
    pub fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }

    /// Ensures the transaction is active.
    pub fn ensure_active(&self) -> DriverResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            _ => Err(DriverError::TransactionInactive(self.id)),
        }
    }
}

/// Membership diff of an owning to-many collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSync {
    /// Owner entity type.
    pub owner_entity: String,
    /// Collection property on the owner.
    pub property: String,
    /// Owner primary key.
    pub owner_pk: PrimaryKey,
    /// Target entity type.
    pub target_entity: String,
    /// Keys of items added since the last synchronization.
    pub added: Vec<PrimaryKey>,
    /// Keys of items removed since the last synchronization.
    pub removed: Vec<PrimaryKey>,
}

/// A storage driver.
pub trait Driver: Send + Sync {
    /// Returns true if `begin` opens real transactions.
    fn supports_transactions(&self) -> bool;

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot start a transaction.
    fn begin(&self) -> DriverResult<Transaction>;

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active.
    fn commit(&self, tx: &mut Transaction) -> DriverResult<()>;

    /// Rolls a transaction back, undoing every write made through it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active.
    fn rollback(&self, tx: &mut Transaction) -> DriverResult<()>;

    /// Applies one change set.
    ///
    /// Returns the generated primary key of a created row, if the driver
    /// generated one.
    ///
    /// # Errors
    ///
    /// Returns constraint, uniqueness, missing-row and version errors.
    fn persist_change_set(
        &self,
        change_set: &ChangeSet,
        tx: Option<&Transaction>,
    ) -> DriverResult<Option<PrimaryKey>>;

    /// Applies the membership diff of an owning to-many collection.
    ///
    /// # Errors
    ///
    /// Returns an error if either side of an added pair does not exist.
    fn synchronize_collection(
        &self,
        sync: &CollectionSync,
        tx: Option<&Transaction>,
    ) -> DriverResult<()>;

    /// Reads one row by primary key, optionally taking a row lock.
    ///
    /// # Errors
    ///
    /// Returns an error if a row lock is requested without an active transaction.
    fn find_one(
        &self,
        entity_name: &str,
        pk: &PrimaryKey,
        lock: Option<LockMode>,
        tx: Option<&Transaction>,
    ) -> DriverResult<Option<Row>>;

    /// Reads the target rows of a to-many relation of one owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown to the driver.
    fn find_collection(
        &self,
        owner_entity: &str,
        property: &str,
        owner_pk: &PrimaryKey,
        tx: Option<&Transaction>,
    ) -> DriverResult<Vec<Row>>;

    /// Runs `f` inside a new transaction: commit on `Ok`, rollback on `Err`
    /// or when the commit itself fails.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or the driver error of `begin`/`commit`.
    fn transactional<T, E, F>(&self, f: F) -> Result<T, E>
    where
        Self: Sized,
        E: From<DriverError>,
        F: FnOnce(&Transaction) -> Result<T, E>,
    {
        let mut tx = self.begin()?;
        match f(&tx) {
            Ok(value) => match self.commit(&mut tx) {
                Ok(()) => Ok(value),
                Err(err) => {
                    if tx.is_active() {
                        let _ = self.rollback(&mut tx);
                    }
                    Err(err.into())
                }
            },
            Err(err) => {
                // The closure's error wins over a failed rollback.
                let _ = self.rollback(&mut tx);
                Err(err)
            }
        }
    }
}

//! Error types for the unit of work.

use crate::driver::DriverError;
use crate::types::EntityToken;
use crate::value::Value;
use thiserror::Error;

/// Result type for unit-of-work operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the unit of work.
///
/// All variants except [`CoreError::Driver`] are synchronous validation
/// failures of the operation that raised them. Driver failures are passed
/// through unmodified.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The entity is not present in the identity registry.
    #[error("entity {entity_name} ({token}) is not managed by this unit of work")]
    EntityNotManaged {
        /// Entity type name.
        entity_name: String,
        /// Instance token.
        token: EntityToken,
    },

    /// A value added to a relation collection is not an entity of the target type.
    #[error("{value} is not a {expected} entity and cannot join {owner}.{property}")]
    NotAnEntity {
        /// Owner entity type.
        owner: String,
        /// Collection property.
        property: String,
        /// Expected target entity type.
        expected: String,
        /// Description of the rejected value.
        value: String,
    },

    /// The inverse side of a many-to-many relation was modified while the
    /// owning side cannot reflect it.
    #[error(
        "cannot modify inverse side of many-to-many collection {entity_name}.{property} \
         when the owning side is not initialized; work with the owning side instead"
    )]
    InverseCollectionModification {
        /// Entity type holding the inverse collection.
        entity_name: String,
        /// Inverse collection property.
        property: String,
    },

    /// A pessimistic lock or locked read was requested outside a transaction.
    #[error("an open transaction is required for this operation")]
    TransactionRequired,

    /// Optimistic locking on an entity type without a version field.
    #[error("cannot obtain optimistic lock on unversioned entity {entity_name}")]
    NotVersioned {
        /// Entity type name.
        entity_name: String,
    },

    /// Optimistic lock comparison failed.
    #[error(
        "the optimistic lock on entity {entity_name} failed: version {expected:?} was expected, \
         but is actually {actual:?}"
    )]
    LockVersionMismatch {
        /// Entity type name.
        entity_name: String,
        /// The version the caller expected.
        expected: Value,
        /// The version currently held by the entity.
        actual: Value,
    },

    /// No metadata registered for the entity type.
    #[error("unknown entity type: {name}")]
    UnknownEntity {
        /// Requested entity type name.
        name: String,
    },

    /// No such property on the entity type.
    #[error("unknown property {entity_name}.{property}")]
    UnknownProperty {
        /// Entity type name.
        entity_name: String,
        /// Requested property name.
        property: String,
    },

    /// The token does not refer to an entity in this unit of work's arena.
    #[error("unknown entity token {token}")]
    UnknownToken {
        /// The token that failed to resolve.
        token: EntityToken,
    },

    /// A write needs the identifier of an entity that does not have one yet.
    #[error("{entity_name}.{property} references {target} which has no identifier yet")]
    UnresolvedReference {
        /// Entity type holding the reference.
        entity_name: String,
        /// Referencing property.
        property: String,
        /// Referenced instance.
        target: EntityToken,
    },

    /// The collection has not been loaded.
    #[error("collection {entity_name}.{property} is not initialized")]
    CollectionNotInitialized {
        /// Owner entity type.
        entity_name: String,
        /// Collection property.
        property: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },

    /// Storage driver failure.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

impl CoreError {
    /// Creates an entity-not-managed error.
    pub fn entity_not_managed(entity_name: impl Into<String>, token: EntityToken) -> Self {
        Self::EntityNotManaged {
            entity_name: entity_name.into(),
            token,
        }
    }

    /// Creates an unknown-entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Creates an unknown-property error.
    pub fn unknown_property(entity_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            entity_name: entity_name.into(),
            property: property.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error came from the storage driver.
    #[must_use]
    pub fn is_driver_error(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}

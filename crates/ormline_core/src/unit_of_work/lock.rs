//! Optimistic and pessimistic locking of managed entities.

use super::UnitOfWork;
use crate::driver::{Driver, LockMode};
use crate::error::{CoreError, CoreResult};
use crate::types::EntityToken;
use crate::value::Value;
use tracing::debug;

impl<D: Driver> UnitOfWork<D> {
    /// Locks a managed entity.
    ///
    /// With [`LockMode::Optimistic`], compares `expected` against the
    /// entity's current version, loading a lazy reference first. Without an
    /// expected version the call only validates that the type is versioned.
    /// Pessimistic modes take a row lock through the driver and require an
    /// open transaction.
    ///
    /// # Errors
    ///
    /// - `EntityNotManaged` if the entity is not in the identity map
    /// - `NotVersioned` for optimistic locks on unversioned types
    /// - `LockVersionMismatch` if the versions differ
    /// - `TransactionRequired` for pessimistic locks outside a transaction
    pub fn lock(
        &mut self,
        token: EntityToken,
        mode: LockMode,
        expected: Option<Value>,
    ) -> CoreResult<()> {
        let meta = self.meta_of(token)?;
        if !self.identity_map.contains(token) {
            return Err(CoreError::entity_not_managed(&meta.name, token));
        }

        if mode.is_pessimistic() {
            let tx = self.transaction.as_ref().ok_or(CoreError::TransactionRequired)?;
            let pk = self
                .pk_of(token)
                .ok_or_else(|| CoreError::entity_not_managed(&meta.name, token))?;
            self.driver.find_one(&meta.name, &pk, Some(mode), Some(tx))?;
            debug!(entity = %meta.name, %pk, ?mode, "row locked");
            return Ok(());
        }

        let Some(field) = meta.version_field.as_deref() else {
            return Err(CoreError::NotVersioned {
                entity_name: meta.name.clone(),
            });
        };
        let Some(expected) = expected else {
            return Ok(());
        };
        if !self.graph.entity(token)?.is_initialized() {
            self.init_entity(token)?;
        }
        let actual = self.value(token, field)?;
        if actual != expected {
            return Err(CoreError::LockVersionMismatch {
                entity_name: meta.name.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

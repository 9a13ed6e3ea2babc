//! Unit of work configuration.

/// Configuration for a unit of work.
#[derive(Debug, Clone)]
pub struct UnitOfWorkConfig {
    /// Whether `commit()` opens its own transaction when none is active and
    /// the driver supports transactions.
    pub implicit_transactions: bool,

    /// Value stamped on a versioned entity's version field at insert time
    /// when the caller left it unset.
    pub initial_version: i64,

    /// Whether mutating one side of a bidirectional relation updates the
    /// loaded other side.
    pub propagate_relations: bool,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            implicit_transactions: true,
            initial_version: 1,
            propagate_relations: true,
        }
    }
}

impl UnitOfWorkConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether commits run inside an implicit transaction.
    #[must_use]
    pub const fn implicit_transactions(mut self, value: bool) -> Self {
        self.implicit_transactions = value;
        self
    }

    /// Sets the version stamped on newly inserted versioned entities.
    #[must_use]
    pub const fn initial_version(mut self, value: i64) -> Self {
        self.initial_version = value;
        self
    }

    /// Sets whether bidirectional relations are kept in sync on mutation.
    #[must_use]
    pub const fn propagate_relations(mut self, value: bool) -> Self {
        self.propagate_relations = value;
        self
    }
}

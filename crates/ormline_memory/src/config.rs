//! In-memory driver configuration.

/// Configuration for a [`crate::MemoryDriver`].
#[derive(Debug, Clone)]
pub struct MemoryDriverConfig {
    /// Whether `begin` opens transactions. When false the unit of work
    /// writes without an implicit transaction.
    pub transactions: bool,

    /// Whether inserts, updates and deletes check foreign keys.
    pub enforce_foreign_keys: bool,

    /// Whether every operation is recorded in the journal.
    pub journal: bool,
}

impl Default for MemoryDriverConfig {
    fn default() -> Self {
        Self {
            transactions: true,
            enforce_foreign_keys: true,
            journal: true,
        }
    }
}

impl MemoryDriverConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the driver supports transactions.
    #[must_use]
    pub const fn transactions(mut self, value: bool) -> Self {
        self.transactions = value;
        self
    }

    /// Sets whether foreign keys are checked.
    #[must_use]
    pub const fn enforce_foreign_keys(mut self, value: bool) -> Self {
        self.enforce_foreign_keys = value;
        self
    }

    /// Sets whether operations are journaled.
    #[must_use]
    pub const fn journal(mut self, value: bool) -> Self {
        self.journal = value;
        self
    }
}

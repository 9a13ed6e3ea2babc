//! Unit of work statistics.
//!
//! Counters are atomic so they can be read through a shared reference while
//! a commit is running.

use crate::change_set::ChangeSetType;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters of one unit of work.
#[derive(Debug, Default)]
pub struct UnitOfWorkStats {
    commits: AtomicU64,
    empty_commits: AtomicU64,
    failed_commits: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    extra_updates: AtomicU64,
    collection_syncs: AtomicU64,
    transactions_opened: AtomicU64,
    transactions_rolled_back: AtomicU64,
}

impl UnitOfWorkStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_empty_commit(&self) {
        self.empty_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_commit(&self) {
        self.failed_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_change_set(&self, kind: ChangeSetType) {
        let counter = match kind {
            ChangeSetType::Create => &self.creates,
            ChangeSetType::Update => &self.updates,
            ChangeSetType::Delete => &self.deletes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_extra_update(&self) {
        self.extra_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_collection_sync(&self) {
        self.collection_syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_open(&self) {
        self.transactions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of successful commits, empty ones included.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of commits that found nothing to write.
    pub fn empty_commits(&self) -> u64 {
        self.empty_commits.load(Ordering::Relaxed)
    }

    /// Returns the number of commits that failed.
    pub fn failed_commits(&self) -> u64 {
        self.failed_commits.load(Ordering::Relaxed)
    }

    /// Returns the number of applied CREATE change sets.
    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    /// Returns the number of applied UPDATE change sets, extra updates included.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Returns the number of applied DELETE change sets.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the number of deferred extra updates processed.
    pub fn extra_updates(&self) -> u64 {
        self.extra_updates.load(Ordering::Relaxed)
    }

    /// Returns the number of collection synchronizations.
    pub fn collection_syncs(&self) -> u64 {
        self.collection_syncs.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions opened by commits.
    pub fn transactions_opened(&self) -> u64 {
        self.transactions_opened.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back after a failed commit.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }
}

/// Outcome of one `commit()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    /// Applied CREATE change sets.
    pub created: usize,
    /// Applied UPDATE change sets, extra updates excluded.
    pub updated: usize,
    /// Applied DELETE change sets.
    pub deleted: usize,
    /// Deferred assignments applied after the main pass.
    pub extra_updates: usize,
    /// Collections synchronized.
    pub collections_synchronized: usize,
    /// Entity type order used for this commit.
    pub commit_order: Vec<String>,
    /// Whether this commit opened its own transaction.
    pub implicit_transaction: bool,
}

impl CommitSummary {
    /// Returns true if the commit wrote nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created == 0
            && self.updated == 0
            && self.deleted == 0
            && self.extra_updates == 0
            && self.collections_synchronized == 0
    }
}

//! # ormline Memory
//!
//! In-memory storage driver for ormline.
//!
//! The driver keeps one table per entity type and one pivot table per
//! owning to-many relation. It checks primary-key uniqueness, foreign keys
//! and optimistic-lock versions, supports savepoint transactions, and
//! records every operation in a journal. Fail points make the next matching
//! operation fail, for testing failure handling.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ormline_memory::{FailPoint, MemoryDriver};
//!
//! let driver = Arc::new(MemoryDriver::new(Arc::clone(&metadata)));
//! driver.fail_on(FailPoint::Insert("Book".into()));
//! let mut uow = UnitOfWork::new(Arc::clone(&driver), metadata);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod driver;
mod journal;
mod store;

pub use config::MemoryDriverConfig;
pub use driver::MemoryDriver;
pub use journal::{FailPoint, JournalEntry};

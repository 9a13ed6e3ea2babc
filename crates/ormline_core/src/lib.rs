//! # ormline Core
//!
//! Change-tracking and commit-ordering engine for ormline.
//!
//! This crate provides:
//! - An identity map keyed by entity type and primary key
//! - Cascading persist, remove and merge over cyclic object graphs
//! - Snapshot-based change-set computation
//! - Foreign-key aware commit ordering with deferred extra updates
//! - Optimistic and pessimistic locking
//!
//! Storage is reached through the [`Driver`] trait; `ormline_memory`
//! provides an in-memory implementation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ormline_core::{EntityMeta, IdStrategy, MetadataStorage, RelationMeta, UnitOfWork};
//!
//! let mut metadata = MetadataStorage::new();
//! metadata
//!     .register(
//!         EntityMeta::new("Author")
//!             .primary_key("id")
//!             .id_strategy(IdStrategy::Increment)
//!             .scalar("name")
//!             .relation("books", RelationMeta::to_many_inverse("Book", "author")),
//!     )
//!     .register(
//!         EntityMeta::new("Book")
//!             .primary_key("id")
//!             .id_strategy(IdStrategy::Increment)
//!             .scalar("title")
//!             .relation("author", RelationMeta::to_one("Author").required().inversed_by("books")),
//!     );
//!
//! let mut uow = UnitOfWork::new(driver, Arc::new(metadata));
//! let author = uow.create("Author", [("name", "Herbert")])?;
//! let book = uow.create("Book", [("title", "Dune")])?;
//! uow.set_field(book, "author", author)?;
//! uow.persist(book)?;
//! let summary = uow.commit()?;
//! assert_eq!(summary.created, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod change_set;
pub mod commit_order;
pub mod config;
pub mod driver;
pub mod entity;
pub mod error;
pub mod events;
pub mod metadata;
pub mod registry;
pub mod stats;
pub mod types;
pub mod unit_of_work;
pub mod value;

pub use change_set::{ChangeSet, ChangeSetType, EntityData, PayloadValue};
pub use commit_order::CommitOrderCalculator;
pub use config::UnitOfWorkConfig;
pub use driver::{
    CollectionSync, Driver, DriverError, DriverResult, LockMode, Row, Transaction,
    TransactionState,
};
pub use entity::{Collection, Entity, EntityGraph, FieldValue};
pub use error::{CoreError, CoreResult};
pub use events::{EntityEvent, EventManager, EventSubscriber, EventType, FlushEvent};
pub use metadata::{
    Cascade, CascadeSet, EntityMeta, IdStrategy, MetadataStorage, PropertyMeta, RelationKind,
    RelationMeta,
};
pub use registry::IdentityMap;
pub use stats::{CommitSummary, UnitOfWorkStats};
pub use types::{CollectionId, EntityToken, TransactionId};
pub use unit_of_work::{Criteria, ExtraUpdate, IdentifierPlaceholder, UnitOfWork};
pub use value::{PrimaryKey, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

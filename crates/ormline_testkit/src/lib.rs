//! # ormline Testkit
//!
//! Test utilities for ormline.
//!
//! This crate provides:
//! - Schemas and unit-of-work contexts over the in-memory driver
//! - Property-based test generators using proptest
//! - A recording event subscriber
//! - Test log capture
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ormline_testkit::prelude::*;
//!
//! #[test]
//! fn author_and_books() {
//!     let mut ctx = TestContext::library();
//!     let (author, _) = scenarios::author_with_books(&mut ctx, "Ann", 2).unwrap();
//!     ctx.commit().unwrap();
//!     assert!(ctx.primary_key(author).unwrap().is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod recording;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::recording::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use recording::*;

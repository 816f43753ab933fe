//! # kvorm Testkit
//!
//! Test utilities for kvorm.
//!
//! This crate provides:
//! - Test fixtures and database helpers, including a store that survives
//!   reopening a database
//! - Property-based test generators using proptest
//! - Invariant checkers for relationships, counters and the audit log
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvorm_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         let people = scenarios::register_family(db).unwrap();
//!         // ... test operations
//!         assert_invariants(db);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;

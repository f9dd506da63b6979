//! # Trivit Testkit
//!
//! Test utilities for Trivit sync.
//!
//! This crate provides:
//! - Counter fixtures and seeded stores
//! - Property-based test generators using proptest
//! - A phone/watch pair over a loopback link, pumped to quiescence
//! - Wire test vectors shared with other implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trivit_testkit::prelude::*;
//!
//! #[test]
//! fn watch_follows_phone() {
//!     let mut pair = ReplicaPair::new(sample_counters(3), Vec::new(), true);
//!     pair.pump();
//!     pair.assert_converged();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
pub use vectors::*;

//! # Trivit Sync Protocol
//!
//! Counter model and wire messages exchanged between the phone (primary)
//! and the watch (secondary).
//!
//! This crate provides:
//! - [`Counter`], the synchronized unit, and its identifiers
//! - [`CounterRecord`], the wire projection of a counter
//! - [`SyncMessage`], the closed set of five message shapes
//! - Payload encoding/decoding with per-field validation
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod counter;
mod error;
mod messages;
mod record;

pub use counter::{Counter, CounterId, Timestamp, DEFAULT_TITLE, MAX_COUNT};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{MessageKind, Role, SyncMessage};
pub use record::CounterRecord;

/// Wire field names.
pub mod fields {
    /// Message discriminator.
    pub const TYPE: &str = "type";
    /// Array of full records in a full sync.
    pub const TRIVITS: &str = "trivits";
    /// Single record in an update.
    pub const DATA: &str = "data";
    /// Counter identifier.
    pub const ID: &str = "id";
    /// Counter title.
    pub const TITLE: &str = "title";
    /// Tally count.
    pub const COUNT: &str = "count";
    /// Palette index.
    pub const COLOR_INDEX: &str = "colorIndex";
    /// Collapsed UI flag.
    pub const IS_COLLAPSED: &str = "isCollapsed";
    /// Creation time, epoch milliseconds.
    pub const CREATED_AT: &str = "createdAt";
    /// Manual ordering position.
    pub const SORT_ORDER: &str = "sortOrder";
}

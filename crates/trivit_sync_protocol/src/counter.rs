//! The synchronized counter and its identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Title given to a counter created without one.
pub const DEFAULT_TITLE: &str = "New Trivit";

/// Largest tally a counter holds. The wire carries counts as signed
/// 64-bit integers.
pub const MAX_COUNT: u64 = i64::MAX as u64;

/// Unique identifier for a counter.
///
/// Counter IDs are v4 UUIDs that are:
/// - Globally unique across both replicas
/// - Assigned once at creation
/// - Never reused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterId(Uuid);

impl CounterId {
    /// Creates a new random counter ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a counter ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CounterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CounterId({})", self.0)
    }
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for CounterId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Wall-clock instant as milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// The current time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default();
        Self(millis)
    }

    /// Epoch milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }
}

/// A tally counter.
///
/// `deleted_at` is a soft-delete tombstone that only the primary's store
/// uses; it never appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Counter {
    /// Stable identifier.
    pub id: CounterId,
    /// Display title.
    pub title: String,
    /// Current tally, never negative and at most [`MAX_COUNT`].
    pub count: u64,
    /// Index into the app's color palette.
    pub color_index: u32,
    /// Whether the row is collapsed in the list UI.
    pub is_collapsed: bool,
    /// Creation time, immutable.
    pub created_at: Timestamp,
    /// Manual ordering position on the primary.
    pub sort_order: i64,
    /// Soft-delete tombstone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl Counter {
    /// Creates a counter with a fresh ID, a zero count, collapsed.
    pub fn new(title: impl Into<String>, color_index: u32) -> Self {
        Self {
            id: CounterId::new(),
            title: title.into(),
            count: 0,
            color_index,
            is_collapsed: true,
            created_at: Timestamp::now(),
            sort_order: 0,
            deleted_at: None,
        }
    }

    /// Replaces the ID.
    #[must_use]
    pub fn with_id(mut self, id: CounterId) -> Self {
        self.id = id;
        self
    }

    /// Sets the count, capped at [`MAX_COUNT`].
    #[must_use]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count.min(MAX_COUNT);
        self
    }

    /// Sets the sort order.
    #[must_use]
    pub fn with_sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Adds one to the tally. Returns false if it was already at
    /// [`MAX_COUNT`].
    pub fn increment(&mut self) -> bool {
        if self.count >= MAX_COUNT {
            return false;
        }
        self.count += 1;
        true
    }

    /// Removes one from the tally. Returns false if it was already zero.
    pub fn decrement(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }

    /// Sets the tally back to zero.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Marks the counter deleted without removing it.
    pub fn soft_delete(&mut self, at: Timestamp) {
        self.deleted_at = Some(at);
    }

    /// Clears the tombstone.
    pub fn restore(&mut self) {
        self.deleted_at = None;
    }

    /// Whether the counter carries a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE, 0)
    }
}

//! Property-based test generators using proptest.
//!
//! Provides strategies for counters, counter sets with unique ids and
//! sequences of local edits.

use proptest::prelude::*;
use std::collections::HashSet;
use trivit_sync_protocol::{Counter, CounterId, Timestamp};

/// Strategy for generating counter IDs.
pub fn counter_id_strategy() -> impl Strategy<Value = CounterId> {
    any::<u128>().prop_map(|bits| CounterId::from_uuid(uuid_from_bits(bits)))
}

fn uuid_from_bits(bits: u128) -> uuid::Uuid {
    uuid::Builder::from_random_bytes(bits.to_be_bytes()).into_uuid()
}

/// Strategy for generating display titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,23}").expect("Invalid regex")
}

/// Strategy for generating live counters.
pub fn counter_strategy() -> impl Strategy<Value = Counter> {
    (
        counter_id_strategy(),
        title_strategy(),
        0u64..10_000,
        0u32..12,
        any::<bool>(),
        0i64..4_102_444_800_000,
        0i64..64,
    )
        .prop_map(
            |(id, title, count, color_index, is_collapsed, created_at, sort_order)| Counter {
                id,
                title,
                count,
                color_index,
                is_collapsed,
                created_at: Timestamp::from_millis(created_at),
                sort_order,
                deleted_at: None,
            },
        )
}

/// Strategy for generating counters that may carry a tombstone.
pub fn maybe_deleted_counter_strategy() -> impl Strategy<Value = Counter> {
    (counter_strategy(), prop::option::weighted(0.25, 0i64..4_102_444_800_000)).prop_map(
        |(mut counter, deleted_at)| {
            counter.deleted_at = deleted_at.map(Timestamp::from_millis);
            counter
        },
    )
}

/// Strategy for generating a set of counters with distinct ids.
pub fn counter_set_strategy(
    element: impl Strategy<Value = Counter>,
    max: usize,
) -> impl Strategy<Value = Vec<Counter>> {
    prop::collection::vec(element, 0..=max).prop_map(|counters| {
        let mut seen = HashSet::new();
        counters.into_iter().filter(|c| seen.insert(c.id)).collect()
    })
}

/// A local edit applied to one replica.
#[derive(Debug, Clone)]
pub enum LocalEdit {
    /// Add one to the counter at this index.
    Increment(usize),
    /// Remove one from the counter at this index.
    Decrement(usize),
    /// Zero the counter at this index.
    Reset(usize),
    /// Rename the counter at this index.
    Rename(usize, String),
    /// Collapse or expand the counter at this index.
    SetCollapsed(usize, bool),
    /// Delete the counter at this index.
    Delete(usize),
    /// Create a counter.
    Create(String, u32),
}

impl LocalEdit {
    /// Index of the counter this edit targets, if any.
    pub fn target(&self) -> Option<usize> {
        match self {
            LocalEdit::Increment(i)
            | LocalEdit::Decrement(i)
            | LocalEdit::Reset(i)
            | LocalEdit::Rename(i, _)
            | LocalEdit::SetCollapsed(i, _)
            | LocalEdit::Delete(i) => Some(*i),
            LocalEdit::Create(..) => None,
        }
    }
}

/// Strategy for generating local edits.
pub fn local_edit_strategy() -> impl Strategy<Value = LocalEdit> {
    let index = 0usize..16;
    prop_oneof![
        4 => index.clone().prop_map(LocalEdit::Increment),
        2 => index.clone().prop_map(LocalEdit::Decrement),
        1 => index.clone().prop_map(LocalEdit::Reset),
        1 => (index.clone(), title_strategy()).prop_map(|(i, t)| LocalEdit::Rename(i, t)),
        1 => (index.clone(), any::<bool>()).prop_map(|(i, c)| LocalEdit::SetCollapsed(i, c)),
        1 => index.prop_map(LocalEdit::Delete),
        1 => (title_strategy(), 0u32..12).prop_map(|(t, c)| LocalEdit::Create(t, c)),
    ]
}

/// Strategy for generating a sequence of local edits.
pub fn edit_sequence_strategy(
    min_edits: usize,
    max_edits: usize,
) -> impl Strategy<Value = Vec<LocalEdit>> {
    prop::collection::vec(local_edit_strategy(), min_edits..max_edits)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

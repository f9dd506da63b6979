//! Counter fixtures and seeded stores.

use std::sync::Arc;
use trivit_sync_engine::MemoryCounterStore;
use trivit_sync_protocol::{Counter, CounterId, Timestamp};

/// Fixed creation time used by fixtures, so snapshots compare equal.
pub const FIXTURE_CREATED_AT: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// A live counter with the given title, count and position.
pub fn counter(title: &str, count: u64, sort_order: i64) -> Counter {
    let mut counter = Counter::new(title, 0)
        .with_count(count)
        .with_sort_order(sort_order);
    counter.created_at = FIXTURE_CREATED_AT;
    counter
}

/// `n` live counters titled "Counter 0", "Counter 1", ... in order.
pub fn sample_counters(n: usize) -> Vec<Counter> {
    (0..n)
        .map(|i| {
            let position = i64::try_from(i).unwrap_or(i64::MAX);
            let mut c = counter(&format!("Counter {i}"), i as u64, position);
            c.color_index = (i % 8) as u32;
            c
        })
        .collect()
}

/// A soft-deleted copy of `counter`.
pub fn tombstoned(counter: &Counter) -> Counter {
    let mut deleted = counter.clone();
    deleted.soft_delete(Timestamp::from_millis(FIXTURE_CREATED_AT.as_millis() + 1));
    deleted
}

/// A memory store holding `counters`.
pub fn seeded_store(counters: impl IntoIterator<Item = Counter>) -> Arc<MemoryCounterStore> {
    Arc::new(MemoryCounterStore::with_counters(counters))
}

/// The three-counter reconciliation scenario.
///
/// The phone holds A=5 and B=2; the watch holds a stale B=1 and a C=9
/// the phone no longer has.
#[derive(Debug, Clone)]
pub struct ReconcileScenario {
    /// Counter only the phone has.
    pub a: Counter,
    /// Counter both have, fresher on the phone.
    pub b: Counter,
    /// Counter only the watch has.
    pub c: Counter,
}

impl ReconcileScenario {
    /// Builds the scenario with fresh ids.
    pub fn new() -> Self {
        Self {
            a: counter("A", 5, 0),
            b: counter("B", 2, 1),
            c: counter("C", 9, 2),
        }
    }

    /// The phone's counters.
    pub fn phone(&self) -> Vec<Counter> {
        vec![self.a.clone(), self.b.clone()]
    }

    /// The watch's counters.
    pub fn watch(&self) -> Vec<Counter> {
        vec![self.b.clone().with_count(1), self.c.clone()]
    }

    /// Ids and counts the watch must end up with.
    pub fn expected(&self) -> Vec<(CounterId, u64)> {
        vec![(self.a.id, 5), (self.b.id, 2)]
    }
}

impl Default for ReconcileScenario {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trivit_sync_engine::CounterStore;

    #[test]
    fn sample_counters_are_ordered() {
        let counters = sample_counters(4);
        let orders: Vec<_> = counters.iter().map(|c| c.sort_order).collect();
        assert_eq!(orders, [0, 1, 2, 3]);
        assert_eq!(counters[3].count, 3);
    }

    #[test]
    fn tombstoned_is_hidden_from_live_fetch() {
        let live = counter("Live", 0, 0);
        let gone = tombstoned(&counter("Gone", 0, 1));
        let store = seeded_store([live.clone(), gone]);

        let fetched = store.fetch_all(false).unwrap();
        assert_eq!(fetched, vec![live]);
    }
}

//! Record store contract the engines persist through.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use trivit_sync_protocol::{Counter, CounterId};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a record store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Staged changes could not be persisted.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// No counter has this id.
    #[error("counter {0} not found")]
    NotFound(CounterId),
}

/// Local persistence for one replica's counters.
///
/// Mutations are staged and become durable on [`save`](Self::save). A
/// failed save leaves the staged state in place.
pub trait CounterStore: Send + Sync {
    /// All counters ordered by sort order, then creation time, then id.
    /// Soft-deleted counters are included only when asked for.
    fn fetch_all(&self, include_deleted: bool) -> StoreResult<Vec<Counter>>;

    /// Looks up one counter, deleted or not.
    fn get(&self, id: CounterId) -> StoreResult<Option<Counter>>;

    /// Looks up one counter, failing if it is absent.
    fn require(&self, id: CounterId) -> StoreResult<Counter> {
        self.get(id)?.ok_or(StoreError::NotFound(id))
    }

    /// Inserts or replaces a counter by id.
    fn upsert(&self, counter: Counter) -> StoreResult<()>;

    /// Removes a counter entirely. Returns true if it existed.
    fn hard_delete(&self, id: CounterId) -> StoreResult<bool>;

    /// One past the largest sort order in the store, or 0 when empty.
    fn next_sort_order(&self) -> StoreResult<i64> {
        Ok(self
            .fetch_all(true)?
            .iter()
            .map(|c| c.sort_order)
            .max()
            .map_or(0, |max| max.saturating_add(1)))
    }

    /// Ids of every stored counter, deleted or not.
    fn ids(&self) -> StoreResult<Vec<CounterId>> {
        Ok(self.fetch_all(true)?.into_iter().map(|c| c.id).collect())
    }

    /// Persists staged changes.
    fn save(&self) -> StoreResult<()>;
}

/// In-memory store for tests and simulation.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: RwLock<HashMap<CounterId, Counter>>,
    fail_saves: AtomicBool,
    saves: AtomicU64,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `counters`.
    pub fn with_counters(counters: impl IntoIterator<Item = Counter>) -> Self {
        let store = Self::new();
        store
            .counters
            .write()
            .extend(counters.into_iter().map(|c| (c.id, c)));
        store
    }

    /// Makes every subsequent save fail until reset.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Every counter, ordered like [`CounterStore::fetch_all`].
    pub fn snapshot(&self) -> Vec<Counter> {
        let mut counters: Vec<Counter> = self.counters.read().values().cloned().collect();
        sort_counters(&mut counters);
        counters
    }

    /// Number of stored counters, including soft-deleted ones.
    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.counters.read().is_empty()
    }
}

impl CounterStore for MemoryCounterStore {
    fn fetch_all(&self, include_deleted: bool) -> StoreResult<Vec<Counter>> {
        let mut counters: Vec<Counter> = self
            .counters
            .read()
            .values()
            .filter(|c| include_deleted || !c.is_deleted())
            .cloned()
            .collect();
        sort_counters(&mut counters);
        Ok(counters)
    }

    fn get(&self, id: CounterId) -> StoreResult<Option<Counter>> {
        Ok(self.counters.read().get(&id).cloned())
    }

    fn upsert(&self, counter: Counter) -> StoreResult<()> {
        self.counters.write().insert(counter.id, counter);
        Ok(())
    }

    fn hard_delete(&self, id: CounterId) -> StoreResult<bool> {
        Ok(self.counters.write().remove(&id).is_some())
    }

    fn ids(&self) -> StoreResult<Vec<CounterId>> {
        Ok(self.counters.read().keys().copied().collect())
    }

    fn save(&self) -> StoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Persistence("save rejected".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn sort_counters(counters: &mut [Counter]) {
    counters.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

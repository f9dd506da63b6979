//! A phone and a watch joined by a loopback link.
//!
//! Events are delivered by hand with [`ReplicaPair::pump`], so tests are
//! deterministic and need no async runtime.

use crate::generators::LocalEdit;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use trivit_sync_engine::{
    CounterStore, LoopbackLink, LoopbackTransport, MemoryCounterStore, PrimaryEngine,
    SecondaryEngine, SessionEvent, SyncConfig, SyncResult,
};
use trivit_sync_protocol::{Counter, CounterId, Role};

/// Primary engine used by the harness.
pub type PhoneEngine = PrimaryEngine<LoopbackTransport, MemoryCounterStore>;
/// Secondary engine used by the harness.
pub type WatchEngine = SecondaryEngine<LoopbackTransport, MemoryCounterStore>;

/// Upper bound on pump rounds; a correct pair settles in a handful.
const MAX_PUMP_ROUNDS: usize = 1_000;

/// A phone/watch pair over a loopback link.
pub struct ReplicaPair {
    /// Link controls.
    pub link: LoopbackLink,
    /// The phone.
    pub phone: PhoneEngine,
    /// The watch.
    pub watch: WatchEngine,
    phone_store: Arc<MemoryCounterStore>,
    watch_store: Arc<MemoryCounterStore>,
    phone_events: UnboundedReceiver<SessionEvent>,
    watch_events: UnboundedReceiver<SessionEvent>,
}

impl ReplicaPair {
    /// Builds and activates a pair. Startup traffic is not yet delivered.
    pub fn new(phone: Vec<Counter>, watch: Vec<Counter>, reachable: bool) -> Self {
        let link = LoopbackLink::pair(reachable);
        let phone_store = Arc::new(MemoryCounterStore::with_counters(phone));
        let watch_store = Arc::new(MemoryCounterStore::with_counters(watch));

        let pair = Self {
            link: link.link,
            phone: PrimaryEngine::new(
                SyncConfig::new("phone"),
                link.primary,
                Arc::clone(&phone_store),
            ),
            watch: SecondaryEngine::with_store(
                SyncConfig::new("watch"),
                link.secondary,
                Arc::clone(&watch_store),
            ),
            phone_store,
            watch_store,
            phone_events: link.primary_events,
            watch_events: link.secondary_events,
        };
        pair.phone.activate();
        pair.watch.activate();
        pair
    }

    /// The phone's store.
    pub fn phone_store(&self) -> &Arc<MemoryCounterStore> {
        &self.phone_store
    }

    /// The watch's store.
    pub fn watch_store(&self) -> &Arc<MemoryCounterStore> {
        &self.watch_store
    }

    /// Delivers events on both sides until neither has any pending.
    /// Returns the number of events handled.
    ///
    /// # Panics
    ///
    /// Panics if the pair keeps generating traffic without settling.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut progressed = false;
            while let Ok(event) = self.phone_events.try_recv() {
                self.phone.handle_event(event);
                handled += 1;
                progressed = true;
            }
            while let Ok(event) = self.watch_events.try_recv() {
                self.watch.handle_event(event);
                handled += 1;
                progressed = true;
            }
            if !progressed {
                return handled;
            }
        }
        panic!("replica pair did not settle after {MAX_PUMP_ROUNDS} rounds");
    }

    /// The phone's live counters, in order.
    pub fn phone_live(&self) -> Vec<Counter> {
        self.phone_store.fetch_all(false).unwrap_or_default()
    }

    /// Every counter on the watch, in order.
    pub fn watch_all(&self) -> Vec<Counter> {
        self.watch_store.snapshot()
    }

    /// Ids of the phone's live counters, sorted.
    pub fn phone_ids(&self) -> Vec<CounterId> {
        sorted_ids(&self.phone_live())
    }

    /// Ids of the watch's counters, sorted.
    pub fn watch_ids(&self) -> Vec<CounterId> {
        sorted_ids(&self.watch_all())
    }

    /// Asserts the watch holds exactly the phone's live counters, with
    /// equal fields.
    ///
    /// # Panics
    ///
    /// Panics if the replicas differ.
    pub fn assert_converged(&self) {
        let phone = self.phone_live();
        let watch = self.watch_all();
        assert_eq!(sorted_ids(&phone), sorted_ids(&watch), "id sets differ");
        for expected in &phone {
            let actual = watch
                .iter()
                .find(|c| c.id == expected.id)
                .unwrap_or_else(|| panic!("watch lacks {}", expected.id));
            assert_eq!(actual.title, expected.title, "title of {}", expected.id);
            assert_eq!(actual.count, expected.count, "count of {}", expected.id);
            assert_eq!(actual.color_index, expected.color_index);
            assert_eq!(actual.is_collapsed, expected.is_collapsed);
            assert_eq!(actual.created_at, expected.created_at);
        }
    }

    /// Applies `edit` on the given side. An index picks among that side's
    /// counters modulo their number; edits against an empty side are
    /// skipped.
    pub fn apply(&self, role: Role, edit: &LocalEdit) -> SyncResult<()> {
        let counters = match role {
            Role::Primary => self.phone_live(),
            Role::Secondary => self.watch_all(),
        };
        let target = match edit.target() {
            Some(_) if counters.is_empty() => return Ok(()),
            Some(index) => Some(counters[index % counters.len()].id),
            None => None,
        };

        match (role, edit, target) {
            (_, LocalEdit::Create(title, color), _) => match role {
                Role::Primary => self.phone.create_counter(title.clone(), *color).map(drop),
                Role::Secondary => self.watch.create_counter(title.clone(), *color),
            },
            (_, _, None) => Ok(()),
            (Role::Primary, edit, Some(id)) => self.apply_phone(edit, id),
            (Role::Secondary, edit, Some(id)) => self.apply_watch(edit, id),
        }
    }

    fn apply_phone(&self, edit: &LocalEdit, id: CounterId) -> SyncResult<()> {
        let phone = &self.phone;
        match edit {
            LocalEdit::Increment(_) => phone.increment(id).map(drop),
            LocalEdit::Decrement(_) => phone.decrement(id).map(drop),
            LocalEdit::Reset(_) => phone.reset(id).map(drop),
            LocalEdit::Rename(_, title) => phone.rename(id, title.clone()).map(drop),
            LocalEdit::SetCollapsed(_, collapsed) => phone.set_collapsed(id, *collapsed).map(drop),
            LocalEdit::Delete(_) => phone.delete_counter(id),
            LocalEdit::Create(..) => Ok(()),
        }
    }

    fn apply_watch(&self, edit: &LocalEdit, id: CounterId) -> SyncResult<()> {
        let watch = &self.watch;
        match edit {
            LocalEdit::Increment(_) => watch.increment(id).map(drop),
            LocalEdit::Decrement(_) => watch.decrement(id).map(drop),
            LocalEdit::Reset(_) => watch.reset(id).map(drop),
            LocalEdit::Rename(_, title) => watch.rename(id, title.clone()).map(drop),
            LocalEdit::SetCollapsed(_, collapsed) => watch.set_collapsed(id, *collapsed).map(drop),
            LocalEdit::Delete(_) => watch.delete_counter(id),
            LocalEdit::Create(..) => Ok(()),
        }
    }
}

fn sorted_ids(counters: &[Counter]) -> Vec<CounterId> {
    let mut ids: Vec<_> = counters.iter().map(|c| c.id).collect();
    ids.sort();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_counters, ReconcileScenario};

    #[test]
    fn startup_reconciles_scenario() {
        let scenario = ReconcileScenario::new();
        let mut pair = ReplicaPair::new(scenario.phone(), scenario.watch(), true);
        assert!(pair.pump() > 0);

        let counts: Vec<_> = pair.watch_all().iter().map(|c| (c.id, c.count)).collect();
        assert_eq!(counts, scenario.expected());
        pair.assert_converged();
    }

    #[test]
    fn pump_settles_when_idle() {
        let mut pair = ReplicaPair::new(sample_counters(2), Vec::new(), true);
        pair.pump();
        assert_eq!(pair.pump(), 0);
    }

    #[test]
    fn apply_targets_modulo_len() {
        let mut pair = ReplicaPair::new(sample_counters(2), Vec::new(), true);
        pair.pump();
        pair.apply(Role::Primary, &LocalEdit::Increment(3)).unwrap();
        pair.pump();

        assert_eq!(pair.phone_live()[1].count, 2);
        pair.assert_converged();
    }

    #[test]
    fn edits_on_empty_side_are_skipped() {
        let pair = ReplicaPair::new(Vec::new(), Vec::new(), true);
        assert!(pair.apply(Role::Secondary, &LocalEdit::Delete(0)).is_ok());
    }
}

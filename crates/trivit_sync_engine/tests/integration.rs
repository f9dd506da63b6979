//! Integration tests for the primary and secondary engines over a
//! loopback link.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use trivit_sync_engine::{
    ActivationState, CounterStore, LoopbackLink, LoopbackTransport, MemoryCounterStore,
    PrimaryEngine, SecondaryEngine, SessionEvent, SessionTransport, SyncConfig, SyncError,
};
use trivit_sync_protocol::{Counter, CounterId, Role, SyncMessage};

type Phone = PrimaryEngine<LoopbackTransport, MemoryCounterStore>;
type Watch = SecondaryEngine<LoopbackTransport, MemoryCounterStore>;

/// A phone and a watch joined by a loopback link, pumped by hand.
struct Pair {
    link: LoopbackLink,
    phone: Phone,
    watch: Watch,
    phone_events: UnboundedReceiver<SessionEvent>,
    watch_events: UnboundedReceiver<SessionEvent>,
}

impl Pair {
    fn new(phone: Vec<Counter>, watch: Vec<Counter>, reachable: bool) -> Self {
        let link = LoopbackLink::pair(reachable);
        let mut pair = Self {
            link: link.link,
            phone: PrimaryEngine::new(
                SyncConfig::new("phone"),
                link.primary,
                Arc::new(MemoryCounterStore::with_counters(phone)),
            ),
            watch: SecondaryEngine::with_store(
                SyncConfig::new("watch"),
                link.secondary,
                Arc::new(MemoryCounterStore::with_counters(watch)),
            ),
            phone_events: link.primary_events,
            watch_events: link.secondary_events,
        };
        pair.phone.activate();
        pair.watch.activate();
        pair.pump();
        pair
    }

    /// Delivers events until both sides are idle. Returns how many.
    fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
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
    }

    fn watch_store(&self) -> Arc<MemoryCounterStore> {
        self.watch.store().expect("watch store attached")
    }

    fn watch_counts(&self) -> Vec<(CounterId, u64)> {
        self.watch_store()
            .snapshot()
            .into_iter()
            .map(|c| (c.id, c.count))
            .collect()
    }
}

#[test]
fn full_sync_reconciles_watch() {
    let a = Counter::new("A", 0).with_count(5).with_sort_order(0);
    let b = Counter::new("B", 0).with_count(2).with_sort_order(1);
    let c = Counter::new("C", 0).with_count(9).with_sort_order(2);
    let pair = Pair::new(
        vec![a.clone(), b.clone()],
        vec![b.clone().with_count(1), c.clone()],
        true,
    );

    assert_eq!(pair.watch_counts(), vec![(a.id, 5), (b.id, 2)]);
    assert!(pair.watch_store().get(c.id).unwrap().is_none());
    assert_eq!(pair.watch.status().last_sync_succeeded, Some(true));
    assert_eq!(pair.phone.status().last_sync_succeeded, Some(true));
}

#[test]
fn unreachable_start_waits_for_reconnect() {
    let a = Counter::new("A", 0).with_count(3);
    let mut pair = Pair::new(vec![a.clone()], Vec::new(), false);
    assert!(pair.watch_store().is_empty());
    assert_eq!(pair.watch.status().activation, ActivationState::Activated);
    assert_eq!(pair.link.delivered_count(), 0);

    pair.link.set_reachable(true);
    pair.pump();
    assert_eq!(pair.watch_counts(), vec![(a.id, 3)]);
}

#[test]
fn phone_edits_reach_watch() {
    let a = Counter::new("A", 0);
    let mut pair = Pair::new(vec![a.clone()], Vec::new(), true);

    pair.phone.increment(a.id).unwrap();
    pair.phone.increment(a.id).unwrap();
    pair.phone.rename(a.id, "Water").unwrap();
    pair.pump();

    let stored = pair.watch_store().get(a.id).unwrap().unwrap();
    assert_eq!(stored.count, 2);
    assert_eq!(stored.title, "Water");
}

#[test]
fn watch_edits_reach_phone() {
    let a = Counter::new("A", 0).with_count(1);
    let mut pair = Pair::new(vec![a.clone()], Vec::new(), true);

    pair.watch.increment(a.id).unwrap();
    pair.watch.set_collapsed(a.id, false).unwrap();
    pair.pump();

    let stored = pair.phone.store().get(a.id).unwrap().unwrap();
    assert_eq!(stored.count, 2);
    assert!(!stored.is_collapsed);
}

#[test]
fn watch_create_is_echoed_with_phone_id() {
    let mut pair = Pair::new(Vec::new(), Vec::new(), true);
    pair.watch.create_counter("X", 2).unwrap();
    pair.pump();

    let phone = pair.phone.store().snapshot();
    let watch = pair.watch_store().snapshot();
    assert_eq!(phone.len(), 1);
    assert_eq!(watch.len(), 1);
    assert_eq!(phone[0].id, watch[0].id);
    assert_eq!(watch[0].title, "X");
    assert_eq!(watch[0].color_index, 2);
}

#[test]
fn phone_soft_delete_is_hard_on_watch() {
    let a = Counter::new("A", 0).with_sort_order(0);
    let b = Counter::new("B", 0).with_sort_order(1);
    let mut pair = Pair::new(vec![a.clone(), b.clone()], Vec::new(), true);

    pair.phone.delete_counter(a.id).unwrap();
    pair.pump();
    assert!(pair.watch_store().get(a.id).unwrap().is_none());
    assert!(pair.phone.store().get(a.id).unwrap().unwrap().is_deleted());

    pair.phone.sync_all().unwrap();
    pair.pump();
    assert_eq!(pair.watch_counts(), vec![(b.id, 0)]);

    pair.phone.restore_counter(a.id).unwrap();
    pair.pump();
    assert!(pair.watch_store().get(a.id).unwrap().is_some());
}

#[test]
fn watch_delete_is_hard_on_phone() {
    let a = Counter::new("A", 0);
    let mut pair = Pair::new(vec![a.clone()], Vec::new(), true);

    pair.watch.delete_counter(a.id).unwrap();
    pair.pump();
    assert!(pair.phone.store().get(a.id).unwrap().is_none());
}

#[test]
fn unreachable_update_changes_neither_store() {
    let a = Counter::new("A", 0).with_count(1);
    let mut pair = Pair::new(vec![a.clone()], Vec::new(), true);
    pair.link.set_reachable(false);
    pair.pump();

    let before_phone = pair.phone.store().snapshot();
    let before_watch = pair.watch_store().snapshot();

    let result = pair.phone.sync_one(&a.clone().with_count(50));
    assert_eq!(result, Err(SyncError::NotReachable));
    pair.pump();

    assert_eq!(pair.phone.store().snapshot(), before_phone);
    assert_eq!(pair.watch_store().snapshot(), before_watch);
}

#[test]
fn offline_watch_edit_is_overwritten_on_reconnect() {
    let a = Counter::new("A", 0).with_count(1);
    let mut pair = Pair::new(vec![a.clone()], Vec::new(), true);
    pair.link.set_reachable(false);
    pair.pump();

    pair.watch.increment(a.id).unwrap();
    assert_eq!(pair.watch_counts(), vec![(a.id, 2)]);

    pair.link.set_reachable(true);
    pair.pump();
    assert_eq!(pair.watch_counts(), vec![(a.id, 1)]);
}

#[test]
fn single_update_resets_watch_sort_order() {
    let a = Counter::new("A", 0).with_sort_order(0);
    let b = Counter::new("B", 0).with_sort_order(1);
    let c = Counter::new("C", 0).with_sort_order(2);
    let mut pair = Pair::new(vec![a, b, c.clone()], Vec::new(), true);
    assert_eq!(pair.watch_store().get(c.id).unwrap().unwrap().sort_order, 2);

    pair.phone.increment(c.id).unwrap();
    pair.pump();

    assert_eq!(pair.phone.store().get(c.id).unwrap().unwrap().sort_order, 2);
    assert_eq!(pair.watch_store().get(c.id).unwrap().unwrap().sort_order, 0);
}

#[test]
fn repeated_update_is_idempotent() {
    let a = Counter::new("A", 0);
    let mut pair = Pair::new(vec![a.clone()], Vec::new(), true);
    let update = SyncMessage::update(&a.clone().with_count(7)).encode().unwrap();

    let send = |pair: &Pair| {
        pair.phone
            .session()
            .transport()
            .send(update.clone(), Box::new(|_| {}));
    };
    send(&pair);
    pair.pump();
    let once = pair.watch_store().snapshot();
    send(&pair);
    pair.pump();
    assert_eq!(pair.watch_store().snapshot(), once);
}

#[test]
fn malformed_payload_does_not_stop_processing() {
    let a = Counter::new("A", 0);
    let mut pair = Pair::new(vec![a.clone()], Vec::new(), true);

    let transport = pair.phone.session().transport();
    transport.send(vec![0xa1, 0x64, b't', b'y', b'p', b'e', 0x01], Box::new(|_| {}));
    transport.send(b"not cbor".to_vec(), Box::new(|_| {}));
    pair.phone.increment(a.id).unwrap();
    pair.pump();

    assert_eq!(pair.watch.stats().messages_dropped, 2);
    assert_eq!(pair.watch_counts(), vec![(a.id, 1)]);
}

#[test]
fn deactivated_watch_reactivates_and_resyncs() {
    let a = Counter::new("A", 0);
    let mut pair = Pair::new(vec![a.clone()], Vec::new(), true);
    pair.watch_store().hard_delete(a.id).unwrap();

    pair.link.deactivate(Role::Secondary);
    pair.pump();

    assert_eq!(pair.watch.status().activation, ActivationState::Activated);
    assert_eq!(pair.watch_counts(), vec![(a.id, 0)]);
}

#[test]
fn failed_activation_is_reported() {
    let link = LoopbackLink::pair(true);
    link.link.set_fail_activation(true);
    let mut events = link.secondary_events;
    let watch: Watch = SecondaryEngine::new(SyncConfig::new("watch"), link.secondary);
    watch.activate();
    while let Ok(event) = events.try_recv() {
        watch.handle_event(event);
    }

    let status = watch.status();
    assert_eq!(status.activation, ActivationState::Inactive);
    assert!(status.last_error.is_some());
    assert_eq!(
        watch.request_sync(),
        Ok(()),
        "requests without a store are deferred, not sent"
    );
    assert!(watch.has_pending_request());
}

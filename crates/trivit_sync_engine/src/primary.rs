//! Primary (phone) sync engine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::runtime::Replica;
use crate::session::{Session, Signal, SyncStats, SyncStatus};
use crate::store::{CounterStore, StoreError};
use crate::transport::{SessionEvent, SessionTransport};
use std::sync::Arc;
use tracing::{debug, info, warn};
use trivit_sync_protocol::{
    Counter, CounterId, CounterRecord, MessageKind, Role, SyncMessage, Timestamp,
};

/// The source-of-truth replica.
///
/// Holds no sync history: every snapshot is computed fresh from the
/// store. Soft-deleted counters stay in the store but never leave it.
pub struct PrimaryEngine<T, S> {
    session: Session<T>,
    store: Arc<S>,
}

impl<T: SessionTransport, S: CounterStore> PrimaryEngine<T, S> {
    /// Creates an engine over `transport` and `store`. Call
    /// [`activate`](Self::activate) to start the session.
    pub fn new(config: SyncConfig, transport: T, store: Arc<S>) -> Self {
        Self {
            session: Session::new(Role::Primary, transport, config),
            store,
        }
    }

    /// Starts session activation.
    pub fn activate(&self) {
        self.session.activate();
    }

    /// The session wrapper.
    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// The record store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current sync status.
    pub fn status(&self) -> SyncStatus {
        self.session.status()
    }

    /// Traffic counters.
    pub fn stats(&self) -> SyncStats {
        self.session.stats()
    }

    /// Processes one session event. Failures are logged, never returned.
    pub fn handle_event(&self, event: SessionEvent) {
        match self.session.observe(event) {
            Some(Signal::SyncTrigger(reason)) => {
                info!(device = %self.session.config().device_name, ?reason, "sync triggered");
                match self.sync_all() {
                    Err(SyncError::Protocol(err)) if err.is_payload_too_large() => {
                        warn!(error = %err, "full sync exceeds the message size limit");
                    }
                    Err(err) => debug!(error = %err, "triggered full sync not sent"),
                    Ok(()) => {}
                }
            }
            Some(Signal::Message(message)) => {
                let kind = message.kind();
                if let Err(err) = self.handle_message(message) {
                    warn!(
                        device = %self.session.config().device_name,
                        %kind,
                        error = %err,
                        "failed to handle message"
                    );
                    self.session.note_error(&err);
                }
            }
            None => {}
        }
    }

    /// Applies one decoded message from the secondary.
    pub fn handle_message(&self, message: SyncMessage) -> SyncResult<()> {
        match message {
            SyncMessage::RequestSync => self.send_snapshot(),
            SyncMessage::TrivitUpdate(record) => self.apply_update(record),
            SyncMessage::TrivitDelete(id) => self.apply_delete(id),
            SyncMessage::CreateTrivit { title, color_index } => {
                self.apply_create(title, color_index)
            }
            SyncMessage::TrivitsSync(_) => {
                self.session.note_dropped();
                Err(SyncError::UnexpectedMessage {
                    kind: MessageKind::TrivitsSync,
                    role: Role::Primary,
                })
            }
        }
    }

    /// Offers a full snapshot if the peer is reachable.
    pub fn sync_all(&self) -> SyncResult<()> {
        if !self.session.is_reachable() {
            debug!("peer unreachable, skipping full sync");
            return Err(SyncError::NotReachable);
        }
        self.send_snapshot()
    }

    /// Sends one counter's current state.
    pub fn sync_one(&self, counter: &Counter) -> SyncResult<()> {
        self.session.send(&SyncMessage::update(counter))
    }

    /// Tells the secondary a counter is gone.
    pub fn sync_deletion(&self, id: CounterId) -> SyncResult<()> {
        self.session.send(&SyncMessage::delete(id))
    }

    /// Manual "sync now".
    pub fn sync_now(&self) -> SyncResult<()> {
        self.sync_all()
    }

    fn send_snapshot(&self) -> SyncResult<()> {
        let counters = self.store.fetch_all(false)?;
        info!(
            device = %self.session.config().device_name,
            count = counters.len(),
            "sending full sync"
        );
        self.session.send(&SyncMessage::full_sync(&counters))
    }

    fn apply_update(&self, record: CounterRecord) -> SyncResult<()> {
        let id = record.id;
        match self.store.get(id)? {
            Some(mut counter) => {
                record.apply_to(&mut counter);
                self.store.upsert(counter)?;
            }
            None => {
                let sort_order = self.store.next_sort_order()?;
                self.store.upsert(record.into_counter(sort_order))?;
            }
        }
        self.store.save()?;
        debug!(%id, "applied update");
        Ok(())
    }

    fn apply_create(&self, title: String, color_index: u32) -> SyncResult<()> {
        let counter = self.insert_new(title, color_index)?;
        info!(id = %counter.id, title = %counter.title, "created counter for secondary");
        self.sync_one(&counter)
    }

    fn apply_delete(&self, id: CounterId) -> SyncResult<()> {
        if self.store.hard_delete(id)? {
            self.store.save()?;
            info!(%id, "deleted counter at secondary's request");
        } else {
            debug!(%id, "delete for unknown counter");
        }
        Ok(())
    }

    fn insert_new(&self, title: String, color_index: u32) -> SyncResult<Counter> {
        let config = self.session.config();
        let mut counter = Counter::new(config.title_or_default(title), color_index)
            .with_sort_order(self.store.next_sort_order()?);
        counter.is_collapsed = config.default_collapsed;
        self.store.upsert(counter.clone())?;
        self.store.save()?;
        Ok(counter)
    }

    /// Creates a counter at the end of the order and propagates it.
    pub fn create_counter(&self, title: impl Into<String>, color_index: u32) -> SyncResult<Counter> {
        let counter = self.insert_new(title.into(), color_index)?;
        self.best_effort(self.sync_one(&counter));
        Ok(counter)
    }

    /// Adds one to a counter. A counter at its maximum is left untouched.
    pub fn increment(&self, id: CounterId) -> SyncResult<Counter> {
        self.mutate(id, Counter::increment)
    }

    /// Removes one from a counter. A counter at zero is left untouched.
    pub fn decrement(&self, id: CounterId) -> SyncResult<Counter> {
        self.mutate(id, Counter::decrement)
    }

    /// Sets a counter back to zero.
    pub fn reset(&self, id: CounterId) -> SyncResult<Counter> {
        self.mutate(id, |c| {
            let changed = c.count != 0;
            c.reset();
            changed
        })
    }

    /// Renames a counter.
    pub fn rename(&self, id: CounterId, title: impl Into<String>) -> SyncResult<Counter> {
        let title = self.session.config().title_or_default(title.into());
        self.mutate(id, |c| {
            let changed = c.title != title;
            c.title = title;
            changed
        })
    }

    /// Changes a counter's palette index.
    pub fn set_color(&self, id: CounterId, color_index: u32) -> SyncResult<Counter> {
        self.mutate(id, |c| {
            let changed = c.color_index != color_index;
            c.color_index = color_index;
            changed
        })
    }

    /// Collapses or expands a counter.
    pub fn set_collapsed(&self, id: CounterId, collapsed: bool) -> SyncResult<Counter> {
        self.mutate(id, |c| {
            let changed = c.is_collapsed != collapsed;
            c.is_collapsed = collapsed;
            changed
        })
    }

    /// Soft-deletes a counter and tells the secondary to drop it.
    pub fn delete_counter(&self, id: CounterId) -> SyncResult<()> {
        let mut counter = self.live(id)?;
        counter.soft_delete(Timestamp::now());
        self.store.upsert(counter)?;
        self.store.save()?;
        info!(%id, "counter moved to recently deleted");
        self.best_effort(self.sync_deletion(id));
        Ok(())
    }

    /// Clears a counter's tombstone and sends it to the secondary again.
    pub fn restore_counter(&self, id: CounterId) -> SyncResult<Counter> {
        let mut counter = self.store.require(id)?;
        counter.restore();
        self.store.upsert(counter.clone())?;
        self.store.save()?;
        info!(%id, "counter restored");
        self.best_effort(self.sync_one(&counter));
        Ok(counter)
    }

    fn live(&self, id: CounterId) -> SyncResult<Counter> {
        let counter = self.store.require(id)?;
        if counter.is_deleted() {
            return Err(StoreError::NotFound(id).into());
        }
        Ok(counter)
    }

    /// Persists a local edit, then propagates it best-effort.
    fn mutate<F>(&self, id: CounterId, edit: F) -> SyncResult<Counter>
    where
        F: FnOnce(&mut Counter) -> bool,
    {
        let mut counter = self.live(id)?;
        if !edit(&mut counter) {
            return Ok(counter);
        }
        self.store.upsert(counter.clone())?;
        self.store.save()?;
        self.best_effort(self.sync_one(&counter));
        Ok(counter)
    }

    /// Propagation failures are already logged by the session.
    fn best_effort(&self, result: SyncResult<()>) {
        if let Err(err) = result {
            debug!(error = %err, "change not propagated");
        }
    }
}

impl<T, S> Replica for PrimaryEngine<T, S>
where
    T: SessionTransport + 'static,
    S: CounterStore + 'static,
{
    fn role(&self) -> Role {
        Role::Primary
    }

    fn activate(&self) {
        PrimaryEngine::activate(self);
    }

    fn handle_event(&self, event: SessionEvent) {
        PrimaryEngine::handle_event(self, event);
    }

    fn sync_now(&self) -> SyncResult<()> {
        PrimaryEngine::sync_now(self)
    }

    fn status(&self) -> SyncStatus {
        PrimaryEngine::status(self)
    }

    fn stats(&self) -> SyncStats {
        PrimaryEngine::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;
    use crate::transport::RecordingTransport;

    type Engine = PrimaryEngine<Arc<RecordingTransport>, MemoryCounterStore>;

    fn engine_with(counters: Vec<Counter>, reachable: bool) -> Engine {
        let transport = Arc::new(RecordingTransport::new(reachable));
        let store = Arc::new(MemoryCounterStore::with_counters(counters));
        let engine = PrimaryEngine::new(SyncConfig::new("phone"), transport, store);
        engine.activate();
        engine.handle_event(SessionEvent::Activated);
        engine.session().transport().take_sent();
        engine
    }

    fn transport(engine: &Engine) -> &RecordingTransport {
        engine.session().transport()
    }

    fn deliver(engine: &Engine, message: &SyncMessage) {
        engine.handle_event(SessionEvent::MessageReceived(message.encode().unwrap()));
    }

    #[test]
    fn activation_with_reachable_peer_offers_snapshot() {
        let transport = Arc::new(RecordingTransport::new(true));
        let store = Arc::new(MemoryCounterStore::with_counters([Counter::new("A", 0)]));
        let engine = PrimaryEngine::new(SyncConfig::new("phone"), Arc::clone(&transport), store);
        engine.activate();
        engine.handle_event(SessionEvent::Activated);

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], SyncMessage::TrivitsSync(records) if records.len() == 1));
    }

    #[test]
    fn snapshot_excludes_soft_deleted() {
        let live = Counter::new("Live", 0).with_sort_order(1);
        let mut gone = Counter::new("Gone", 0).with_sort_order(0);
        gone.soft_delete(Timestamp::from_millis(1));
        let engine = engine_with(vec![live.clone(), gone], true);

        engine.sync_all().unwrap();
        match transport(&engine).take_sent().as_slice() {
            [SyncMessage::TrivitsSync(records)] => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].id, live.id);
                assert_eq!(records[0].sort_order, Some(1));
            }
            other => panic!("unexpected messages: {other:?}"),
        }
    }

    #[test]
    fn sync_all_checks_reachability() {
        let engine = engine_with(vec![Counter::new("A", 0)], false);
        assert_eq!(engine.sync_all(), Err(SyncError::NotReachable));
        assert!(transport(&engine).sent_payloads().is_empty());
    }

    #[test]
    fn request_sync_answers_with_snapshot() {
        let engine = engine_with(vec![Counter::new("A", 0)], true);
        deliver(&engine, &SyncMessage::RequestSync);
        assert!(matches!(
            transport(&engine).take_sent().as_slice(),
            [SyncMessage::TrivitsSync(_)]
        ));
    }

    #[test]
    fn update_overwrites_fields_but_not_order() {
        let existing = Counter::new("Old", 1).with_count(2).with_sort_order(5);
        let engine = engine_with(vec![existing.clone()], true);

        let mut edited = existing.clone().with_count(9).with_sort_order(0);
        edited.title = "New".into();
        deliver(&engine, &SyncMessage::update(&edited));
        deliver(&engine, &SyncMessage::update(&edited));

        let stored = engine.store().get(existing.id).unwrap().unwrap();
        assert_eq!(stored.count, 9);
        assert_eq!(stored.title, "New");
        assert_eq!(stored.sort_order, 5);
        assert_eq!(engine.store().len(), 1);
    }

    #[test]
    fn update_for_unknown_id_appends() {
        let engine = engine_with(vec![Counter::new("A", 0).with_sort_order(3)], true);
        let incoming = Counter::new("B", 2).with_count(4);
        deliver(&engine, &SyncMessage::update(&incoming));

        let stored = engine.store().get(incoming.id).unwrap().unwrap();
        assert_eq!(stored.sort_order, 4);
        assert_eq!(stored.count, 4);
    }

    #[test]
    fn create_request_is_fulfilled_and_echoed() {
        let engine = engine_with(Vec::new(), true);
        deliver(&engine, &SyncMessage::create("X", 2));

        let counters = engine.store().snapshot();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].title, "X");
        assert_eq!(counters[0].color_index, 2);

        match transport(&engine).take_sent().as_slice() {
            [SyncMessage::TrivitUpdate(record)] => {
                assert_eq!(record.id, counters[0].id);
                assert_eq!(record.title, "X");
                assert_eq!(record.sort_order, None);
            }
            other => panic!("unexpected messages: {other:?}"),
        }
    }

    #[test]
    fn blank_create_uses_default_title() {
        let engine = engine_with(Vec::new(), true);
        deliver(&engine, &SyncMessage::create("", 0));
        assert_eq!(engine.store().snapshot()[0].title, "New Trivit");
    }

    #[test]
    fn inbound_delete_is_hard() {
        let counter = Counter::new("A", 0);
        let engine = engine_with(vec![counter.clone()], true);
        deliver(&engine, &SyncMessage::delete(counter.id));
        assert!(engine.store().is_empty());

        deliver(&engine, &SyncMessage::delete(CounterId::new()));
        assert_eq!(engine.status().last_error, None);
    }

    #[test]
    fn inbound_snapshot_is_rejected() {
        let engine = engine_with(vec![Counter::new("A", 0)], true);
        deliver(&engine, &SyncMessage::TrivitsSync(Vec::new()));
        assert_eq!(engine.store().len(), 1);
        assert_eq!(engine.stats().messages_dropped, 1);
        assert!(engine.status().last_error.is_some());
    }

    #[test]
    fn local_mutations_persist_then_propagate() {
        let counter = Counter::new("A", 0);
        let engine = engine_with(vec![counter.clone()], true);

        engine.increment(counter.id).unwrap();
        engine.increment(counter.id).unwrap();
        let after = engine.decrement(counter.id).unwrap();
        assert_eq!(after.count, 1);
        assert_eq!(engine.store().save_count(), 3);
        assert_eq!(transport(&engine).take_sent().len(), 3);

        engine.rename(counter.id, "Renamed").unwrap();
        engine.set_color(counter.id, 5).unwrap();
        engine.set_collapsed(counter.id, false).unwrap();
        let stored = engine.reset(counter.id).unwrap();
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.color_index, 5);
        assert!(!stored.is_collapsed);
        assert_eq!(stored.count, 0);
    }

    #[test]
    fn unchanged_edits_are_not_sent() {
        let counter = Counter::new("A", 0);
        let engine = engine_with(vec![counter.clone()], true);
        engine.decrement(counter.id).unwrap();
        engine.set_color(counter.id, 0).unwrap();
        assert!(transport(&engine).sent_payloads().is_empty());
    }

    #[test]
    fn local_edits_survive_unreachable_peer() {
        let counter = Counter::new("A", 0);
        let engine = engine_with(vec![counter.clone()], false);
        let after = engine.increment(counter.id).unwrap();
        assert_eq!(after.count, 1);
        assert_eq!(engine.store().get(counter.id).unwrap().unwrap().count, 1);
        assert_eq!(engine.stats().send_failures, 1);
    }

    #[test]
    fn failed_save_skips_propagation() {
        let counter = Counter::new("A", 0);
        let engine = engine_with(vec![counter.clone()], true);
        engine.store().set_fail_saves(true);

        let err = engine.increment(counter.id).unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Persistence(_))));
        assert!(transport(&engine).sent_payloads().is_empty());
    }

    #[test]
    fn soft_delete_and_restore() {
        let counter = Counter::new("A", 0);
        let engine = engine_with(vec![counter.clone()], true);

        engine.delete_counter(counter.id).unwrap();
        assert!(engine.store().get(counter.id).unwrap().unwrap().is_deleted());
        assert_eq!(
            transport(&engine).take_sent(),
            vec![SyncMessage::delete(counter.id)]
        );
        assert!(matches!(
            engine.increment(counter.id),
            Err(SyncError::Store(StoreError::NotFound(_)))
        ));

        let restored = engine.restore_counter(counter.id).unwrap();
        assert!(!restored.is_deleted());
        assert!(matches!(
            transport(&engine).take_sent().as_slice(),
            [SyncMessage::TrivitUpdate(record)] if record.id == counter.id
        ));
    }

    #[test]
    fn create_counter_appends() {
        let engine = engine_with(vec![Counter::new("A", 0).with_sort_order(0)], true);
        let created = engine.create_counter("B", 1).unwrap();
        assert_eq!(created.sort_order, 1);
        assert!(created.is_collapsed);
        assert_eq!(transport(&engine).take_sent().len(), 1);
    }

    #[test]
    fn oversized_snapshot_fails_and_is_recorded() {
        let counters: Vec<Counter> = (0..600)
            .map(|i| Counter::new(format!("Counter {i:0>40}"), 0).with_sort_order(i))
            .collect();
        let engine = engine_with(counters, true);

        let err = engine.sync_all().unwrap_err();
        assert!(matches!(&err, SyncError::Protocol(e) if e.is_payload_too_large()));
        assert!(transport(&engine).sent_payloads().is_empty());
        assert_eq!(engine.status().last_sync_succeeded, Some(false));
        assert_eq!(engine.stats().send_failures, 2);
    }
}

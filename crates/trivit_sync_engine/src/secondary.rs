//! Secondary (watch) sync engine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::runtime::Replica;
use crate::session::{Session, Signal, SyncStats, SyncStatus};
use crate::store::{CounterStore, StoreError};
use crate::transport::{SessionEvent, SessionTransport};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use trivit_sync_protocol::{Counter, CounterId, CounterRecord, MessageKind, Role, SyncMessage};

/// The dependent replica.
///
/// Its store has no tombstones: every full snapshot replaces the local
/// set outright. The store may be wired after construction; a sync
/// requested before then is remembered once and replayed on attach.
pub struct SecondaryEngine<T, S> {
    session: Session<T>,
    store: RwLock<Option<Arc<S>>>,
    pending_request: AtomicBool,
}

impl<T: SessionTransport, S: CounterStore> SecondaryEngine<T, S> {
    /// Creates an engine with no store attached.
    pub fn new(config: SyncConfig, transport: T) -> Self {
        Self {
            session: Session::new(Role::Secondary, transport, config),
            store: RwLock::new(None),
            pending_request: AtomicBool::new(false),
        }
    }

    /// Creates an engine with its store already attached.
    pub fn with_store(config: SyncConfig, transport: T, store: Arc<S>) -> Self {
        let engine = Self::new(config, transport);
        *engine.store.write() = Some(store);
        engine
    }

    /// Wires the record store and replays a deferred sync request.
    pub fn attach_store(&self, store: Arc<S>) {
        *self.store.write() = Some(store);
        if self.pending_request.swap(false, Ordering::SeqCst) {
            info!(device = %self.session.config().device_name, "replaying deferred sync request");
            if let Err(err) = self.request_sync() {
                debug!(error = %err, "deferred sync request not sent");
            }
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

    /// The record store, if attached.
    pub fn store(&self) -> Option<Arc<S>> {
        self.store.read().clone()
    }

    /// Whether a sync request is waiting for the store.
    pub fn has_pending_request(&self) -> bool {
        self.pending_request.load(Ordering::SeqCst)
    }

    /// Current sync status.
    pub fn status(&self) -> SyncStatus {
        self.session.status()
    }

    /// Traffic counters.
    pub fn stats(&self) -> SyncStats {
        self.session.stats()
    }

    fn attached(&self) -> SyncResult<Arc<S>> {
        self.store().ok_or(SyncError::StoreUnavailable)
    }

    /// Processes one session event. Failures are logged, never returned.
    pub fn handle_event(&self, event: SessionEvent) {
        match self.session.observe(event) {
            Some(Signal::SyncTrigger(reason)) => {
                info!(device = %self.session.config().device_name, ?reason, "sync triggered");
                if let Err(err) = self.request_sync() {
                    debug!(error = %err, "triggered sync request not sent");
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

    /// Applies one decoded message from the primary.
    pub fn handle_message(&self, message: SyncMessage) -> SyncResult<()> {
        match message {
            SyncMessage::RequestSync => {
                debug!("ignoring sync request from primary");
                Ok(())
            }
            SyncMessage::CreateTrivit { .. } => {
                self.session.note_dropped();
                Err(SyncError::UnexpectedMessage {
                    kind: MessageKind::CreateTrivit,
                    role: Role::Secondary,
                })
            }
            message => {
                let Some(store) = self.store() else {
                    self.session.note_dropped();
                    self.pending_request.store(true, Ordering::SeqCst);
                    return Err(SyncError::StoreUnavailable);
                };
                match message {
                    SyncMessage::TrivitsSync(records) => self.apply_snapshot(&*store, records),
                    SyncMessage::TrivitUpdate(record) => apply_update(&*store, record),
                    SyncMessage::TrivitDelete(id) => apply_delete(&*store, id),
                    SyncMessage::RequestSync | SyncMessage::CreateTrivit { .. } => Ok(()),
                }
            }
        }
    }

    /// Asks the primary for a full snapshot, or defers the request until
    /// the store is attached.
    pub fn request_sync(&self) -> SyncResult<()> {
        if self.store.read().is_none() {
            debug!("store not attached, deferring sync request");
            self.pending_request.store(true, Ordering::SeqCst);
            return Ok(());
        }
        self.session.send(&SyncMessage::RequestSync)
    }

    /// Manual "sync now".
    pub fn sync_now(&self) -> SyncResult<()> {
        self.request_sync()
    }

    /// Reconciles the local set against a full snapshot.
    fn apply_snapshot(&self, store: &S, records: Vec<CounterRecord>) -> SyncResult<()> {
        let incoming: HashSet<CounterId> = records.iter().map(|r| r.id).collect();

        let mut removed = 0usize;
        for id in store.ids()? {
            if !incoming.contains(&id) {
                store.hard_delete(id)?;
                removed += 1;
            }
        }

        let count = records.len();
        for record in records {
            let sort_order = record.sort_order.unwrap_or(0);
            store.upsert(record.into_counter(sort_order))?;
        }
        store.save()?;
        self.session.mark_snapshot_applied();

        info!(
            device = %self.session.config().device_name,
            count,
            removed,
            "applied full sync"
        );
        Ok(())
    }

    /// Asks the primary to create a counter. It appears locally once the
    /// primary echoes it back.
    pub fn create_counter(&self, title: impl Into<String>, color_index: u32) -> SyncResult<()> {
        let title = self.session.config().title_or_default(title.into());
        self.session.send(&SyncMessage::create(title, color_index))
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

    /// Collapses or expands a counter.
    pub fn set_collapsed(&self, id: CounterId, collapsed: bool) -> SyncResult<Counter> {
        self.mutate(id, |c| {
            let changed = c.is_collapsed != collapsed;
            c.is_collapsed = collapsed;
            changed
        })
    }

    /// Removes a counter and tells the primary.
    pub fn delete_counter(&self, id: CounterId) -> SyncResult<()> {
        let store = self.attached()?;
        if !store.hard_delete(id)? {
            return Err(StoreError::NotFound(id).into());
        }
        store.save()?;
        info!(%id, "counter deleted");
        if let Err(err) = self.session.send(&SyncMessage::delete(id)) {
            debug!(error = %err, "deletion not propagated");
        }
        Ok(())
    }

    /// Persists a local edit, then propagates it best-effort.
    fn mutate<F>(&self, id: CounterId, edit: F) -> SyncResult<Counter>
    where
        F: FnOnce(&mut Counter) -> bool,
    {
        let store = self.attached()?;
        let mut counter = store.require(id)?;
        if !edit(&mut counter) {
            return Ok(counter);
        }
        store.upsert(counter.clone())?;
        store.save()?;
        if let Err(err) = self.session.send(&SyncMessage::update(&counter)) {
            debug!(error = %err, "change not propagated");
        }
        Ok(counter)
    }
}

/// Whole-record overwrite. A missing `sortOrder` resets the position to 0.
fn apply_update<S: CounterStore + ?Sized>(store: &S, record: CounterRecord) -> SyncResult<()> {
    let id = record.id;
    let sort_order = record.sort_order.unwrap_or(0);
    store.upsert(record.into_counter(sort_order))?;
    store.save()?;
    debug!(%id, sort_order, "applied update");
    Ok(())
}

fn apply_delete<S: CounterStore + ?Sized>(store: &S, id: CounterId) -> SyncResult<()> {
    if store.hard_delete(id)? {
        store.save()?;
        info!(%id, "deleted counter at primary's request");
    } else {
        debug!(%id, "delete for unknown counter");
    }
    Ok(())
}

impl<T, S> Replica for SecondaryEngine<T, S>
where
    T: SessionTransport + 'static,
    S: CounterStore + 'static,
{
    fn role(&self) -> Role {
        Role::Secondary
    }

    fn activate(&self) {
        SecondaryEngine::activate(self);
    }

    fn handle_event(&self, event: SessionEvent) {
        SecondaryEngine::handle_event(self, event);
    }

    fn sync_now(&self) -> SyncResult<()> {
        SecondaryEngine::sync_now(self)
    }

    fn status(&self) -> SyncStatus {
        SecondaryEngine::status(self)
    }

    fn stats(&self) -> SyncStats {
        SecondaryEngine::stats(self)
    }
}

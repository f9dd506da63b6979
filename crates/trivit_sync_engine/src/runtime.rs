//! Single-task runtime that serializes all work for one replica.

use crate::error::{SyncError, SyncResult};
use crate::session::{SyncStats, SyncStatus};
use crate::transport::SessionEvent;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use trivit_sync_protocol::Role;

/// A sync engine that can be driven by [`spawn_replica`].
pub trait Replica: Send + Sync + 'static {
    /// The replica's role.
    fn role(&self) -> Role;

    /// Starts session activation.
    fn activate(&self);

    /// Processes one session event.
    fn handle_event(&self, event: SessionEvent);

    /// Manual "sync now".
    fn sync_now(&self) -> SyncResult<()>;

    /// Current sync status.
    fn status(&self) -> SyncStatus;

    /// Traffic counters.
    fn stats(&self) -> SyncStats;
}

type Job<R> = Box<dyn FnOnce(&R) + Send>;

enum Command<R> {
    SyncNow(oneshot::Sender<SyncResult<()>>),
    Status(oneshot::Sender<SyncStatus>),
    Perform(Job<R>),
    Shutdown,
}

/// Handle for sending work to a running replica task.
pub struct SyncHandle<R> {
    role: Role,
    commands: UnboundedSender<Command<R>>,
}

impl<R> Clone for SyncHandle<R> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            commands: self.commands.clone(),
        }
    }
}

impl<R: Replica> SyncHandle<R> {
    /// The replica's role.
    pub fn role(&self) -> Role {
        self.role
    }

    fn submit(&self, command: Command<R>) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::RuntimeStopped)
    }

    /// Runs the replica's manual sync on its task.
    pub async fn sync_now(&self) -> SyncResult<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::SyncNow(tx))?;
        rx.await.map_err(|_| SyncError::RuntimeStopped)?
    }

    /// Reads the replica's status on its task.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Status(tx))?;
        rx.await.map_err(|_| SyncError::RuntimeStopped)
    }

    /// Runs `f` against the replica on its task and returns the result.
    ///
    /// Local mutations go through here so they never race inbound
    /// messages.
    pub async fn perform<F, O>(&self, f: F) -> SyncResult<O>
    where
        F: FnOnce(&R) -> O + Send + 'static,
        O: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Perform(Box::new(move |replica: &R| {
            let _ = tx.send(f(replica));
        })))?;
        rx.await.map_err(|_| SyncError::RuntimeStopped)
    }

    /// Asks the task to stop after the work already queued.
    pub fn shutdown(&self) -> SyncResult<()> {
        self.submit(Command::Shutdown)
    }
}

/// Spawns the task that owns `replica`.
///
/// The task activates the session, then consumes session events and
/// handle commands one at a time until shutdown or until every handle is
/// dropped. Pending events are always handled before the next command,
/// so a command observes every event delivered before it was submitted.
pub fn spawn_replica<R: Replica>(
    replica: Arc<R>,
    events: UnboundedReceiver<SessionEvent>,
) -> (SyncHandle<R>, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let handle = SyncHandle {
        role: replica.role(),
        commands: commands_tx,
    };
    let task = tokio::spawn(replica_task(replica, events, commands_rx));
    (handle, task)
}

async fn replica_task<R: Replica>(
    replica: Arc<R>,
    mut events: UnboundedReceiver<SessionEvent>,
    mut commands: UnboundedReceiver<Command<R>>,
) {
    let role = replica.role();
    info!(%role, "replica task started");
    replica.activate();

    let mut events_open = true;
    loop {
        tokio::select! {
            // Session events drain before any queued command runs.
            biased;

            event = events.recv(), if events_open => match event {
                Some(event) => replica.handle_event(event),
                None => {
                    debug!(%role, "session event stream closed");
                    events_open = false;
                }
            },
            command = commands.recv() => match command {
                Some(Command::SyncNow(respond_to)) => {
                    let _ = respond_to.send(replica.sync_now());
                }
                Some(Command::Status(respond_to)) => {
                    let _ = respond_to.send(replica.status());
                }
                Some(Command::Perform(job)) => job(replica.as_ref()),
                Some(Command::Shutdown) | None => break,
            },
        }
    }

    info!(%role, "replica task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::loopback::{LoopbackLink, LoopbackTransport};
    use crate::primary::PrimaryEngine;
    use crate::secondary::SecondaryEngine;
    use crate::session::ActivationState;
    use crate::store::{CounterStore, MemoryCounterStore};
    use trivit_sync_protocol::Counter;

    type Primary = PrimaryEngine<LoopbackTransport, MemoryCounterStore>;
    type Secondary = SecondaryEngine<LoopbackTransport, MemoryCounterStore>;

    async fn eventually<R, F>(handle: &SyncHandle<R>, check: F)
    where
        R: Replica,
        F: Fn(&R) -> bool + Clone + Send + 'static,
    {
        for _ in 0..200 {
            if handle.perform(check.clone()).await.unwrap() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn pair_converges_after_startup() {
        let pair = LoopbackLink::pair(true);
        let seeded = vec![
            Counter::new("A", 0).with_count(5).with_sort_order(0),
            Counter::new("B", 1).with_count(2).with_sort_order(1),
        ];
        let primary_store = Arc::new(MemoryCounterStore::with_counters(seeded.clone()));
        let primary: Arc<Primary> = Arc::new(PrimaryEngine::new(
            SyncConfig::new("phone"),
            pair.primary,
            primary_store,
        ));
        let secondary: Arc<Secondary> = Arc::new(SecondaryEngine::with_store(
            SyncConfig::new("watch"),
            pair.secondary,
            Arc::new(MemoryCounterStore::with_counters([Counter::new("C", 0)])),
        ));

        let (primary_handle, primary_task) = spawn_replica(primary, pair.primary_events);
        let (secondary_handle, secondary_task) = spawn_replica(secondary, pair.secondary_events);

        let expected: Vec<_> = seeded.iter().map(|c| c.id).collect();
        eventually(&secondary_handle, move |watch: &Secondary| {
            watch
                .store()
                .and_then(|s| s.fetch_all(false).ok())
                .map(|cs| cs.iter().map(|c| c.id).collect::<Vec<_>>())
                .as_ref()
                == Some(&expected)
        })
        .await;

        let status = secondary_handle.status().await.unwrap();
        assert_eq!(status.activation, ActivationState::Activated);
        assert_eq!(status.last_sync_succeeded, Some(true));

        primary_handle.shutdown().unwrap();
        secondary_handle.shutdown().unwrap();
        primary_task.await.unwrap();
        secondary_task.await.unwrap();
    }

    #[tokio::test]
    async fn perform_serializes_local_edits() {
        let pair = LoopbackLink::pair(true);
        let counter = Counter::new("Reps", 0);
        let id = counter.id;
        let primary: Arc<Primary> = Arc::new(PrimaryEngine::new(
            SyncConfig::new("phone"),
            pair.primary,
            Arc::new(MemoryCounterStore::with_counters([counter])),
        ));
        let secondary: Arc<Secondary> = Arc::new(SecondaryEngine::with_store(
            SyncConfig::new("watch"),
            pair.secondary,
            Arc::new(MemoryCounterStore::new()),
        ));
        let (primary_handle, _primary_task) = spawn_replica(primary, pair.primary_events);
        let (secondary_handle, _secondary_task) = spawn_replica(secondary, pair.secondary_events);

        eventually(&secondary_handle, move |watch: &Secondary| {
            watch.store().is_some_and(|s| s.get(id).ok().flatten().is_some())
        })
        .await;

        let after = secondary_handle
            .perform(move |watch: &Secondary| watch.increment(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.count, 1);

        eventually(&primary_handle, move |phone: &Primary| {
            phone.store().get(id).ok().flatten().map(|c| c.count) == Some(1)
        })
        .await;
    }

    #[tokio::test]
    async fn stopped_runtime_reports_error() {
        let pair = LoopbackLink::pair(false);
        let primary: Arc<Primary> = Arc::new(PrimaryEngine::new(
            SyncConfig::new("phone"),
            pair.primary,
            Arc::new(MemoryCounterStore::new()),
        ));
        let (handle, task) = spawn_replica(primary, pair.primary_events);

        assert_eq!(handle.sync_now().await, Err(SyncError::NotReachable));
        handle.shutdown().unwrap();
        task.await.unwrap();

        assert_eq!(handle.sync_now().await, Err(SyncError::RuntimeStopped));
        assert!(matches!(handle.status().await, Err(SyncError::RuntimeStopped)));
    }
}

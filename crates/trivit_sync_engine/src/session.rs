//! Session wrapper: activation, reachability and fail-fast sends.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{SessionEvent, SessionTransport};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trivit_sync_protocol::{MessageKind, Role, SyncMessage, Timestamp};

/// Activation state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// Not activated; sends are refused.
    Inactive,
    /// Activation requested, not yet complete.
    Activating,
    /// Ready to exchange messages.
    Activated,
}

/// Why a sync was triggered automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Activation completed with the peer reachable.
    Activated,
    /// The peer became reachable again.
    Reconnected,
}

/// What an observed session event means for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The engine should run its sync routine.
    SyncTrigger(TriggerReason),
    /// A decoded message from the peer.
    Message(SyncMessage),
}

/// Snapshot of a replica's sync state, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Session activation state.
    pub activation: ActivationState,
    /// Whether the peer is reachable right now.
    pub is_reachable: bool,
    /// Outcome of the most recent sync attempt, if any.
    pub last_sync_succeeded: Option<bool>,
    /// When the last sync completed.
    pub last_sync_at: Option<Timestamp>,
    /// Most recent error message.
    pub last_error: Option<String>,
}

/// Counters about session traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Messages delivered to the peer.
    pub messages_sent: u64,
    /// Messages received and decoded.
    pub messages_received: u64,
    /// Inbound messages discarded without effect.
    pub messages_dropped: u64,
    /// Sends that failed or were refused.
    pub send_failures: u64,
    /// Full snapshots applied locally.
    pub snapshots_applied: u64,
}

#[derive(Debug)]
struct SessionState {
    activation: ActivationState,
    reachable: bool,
    last_sync_succeeded: Option<bool>,
    last_sync_at: Option<Timestamp>,
    last_error: Option<String>,
}

/// Wraps a [`SessionTransport`] with activation tracking, sync triggers
/// and send bookkeeping.
///
/// Inbound payloads are decoded here, at the boundary. Undecodable
/// payloads are logged and dropped.
pub struct Session<T> {
    role: Role,
    transport: T,
    config: SyncConfig,
    state: Arc<RwLock<SessionState>>,
    stats: Arc<RwLock<SyncStats>>,
}

impl<T: SessionTransport> Session<T> {
    /// Creates an inactive session.
    pub fn new(role: Role, transport: T, config: SyncConfig) -> Self {
        Self {
            role,
            transport,
            config,
            state: Arc::new(RwLock::new(SessionState {
                activation: ActivationState::Inactive,
                reachable: false,
                last_sync_succeeded: None,
                last_sync_at: None,
                last_error: None,
            })),
            stats: Arc::new(RwLock::new(SyncStats::default())),
        }
    }

    /// The local role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Requests activation. Does nothing if already activating or active.
    pub fn activate(&self) {
        {
            let mut state = self.state.write();
            if state.activation != ActivationState::Inactive {
                return;
            }
            state.activation = ActivationState::Activating;
        }
        debug!(device = %self.config.device_name, "activating session");
        self.transport.activate();
    }

    /// Current activation state.
    pub fn activation(&self) -> ActivationState {
        self.state.read().activation
    }

    /// Whether the peer is reachable right now.
    pub fn is_reachable(&self) -> bool {
        self.transport.is_reachable()
    }

    /// Folds a session event into the session state.
    pub fn observe(&self, event: SessionEvent) -> Option<Signal> {
        let device = &self.config.device_name;
        match event {
            SessionEvent::Activated => {
                let reachable = self.transport.is_reachable();
                {
                    let mut state = self.state.write();
                    state.activation = ActivationState::Activated;
                    state.reachable = reachable;
                }
                info!(device = %device, reachable, "session activated");
                (reachable && self.config.sync_on_activation)
                    .then_some(Signal::SyncTrigger(TriggerReason::Activated))
            }
            SessionEvent::ActivationFailed(reason) => {
                warn!(device = %device, error = %reason, "session activation failed");
                let mut state = self.state.write();
                state.activation = ActivationState::Inactive;
                state.last_error = Some(reason);
                None
            }
            SessionEvent::BecameInactive => {
                debug!(device = %device, "session became inactive");
                self.state.write().activation = ActivationState::Inactive;
                None
            }
            SessionEvent::Deactivated => {
                debug!(device = %device, "session deactivated");
                self.state.write().activation = ActivationState::Inactive;
                if self.config.auto_reactivate {
                    self.activate();
                }
                None
            }
            SessionEvent::ReachabilityChanged(reachable) => {
                let (was_reachable, activated) = {
                    let mut state = self.state.write();
                    let was = state.reachable;
                    state.reachable = reachable;
                    (was, state.activation == ActivationState::Activated)
                };
                info!(device = %device, reachable, "peer reachability changed");
                (reachable && !was_reachable && activated && self.config.sync_on_reachable)
                    .then_some(Signal::SyncTrigger(TriggerReason::Reconnected))
            }
            SessionEvent::MessageReceived(bytes) => match SyncMessage::decode(&bytes) {
                Ok(message) => {
                    self.stats.write().messages_received += 1;
                    debug!(device = %device, kind = %message.kind(), "message received");
                    Some(Signal::Message(message))
                }
                Err(err) => {
                    warn!(device = %device, error = %err, "dropping undecodable message");
                    self.note_dropped();
                    None
                }
            },
        }
    }

    /// Sends a message, ignoring the delivery outcome beyond bookkeeping.
    pub fn send(&self, message: &SyncMessage) -> SyncResult<()> {
        self.send_with(message, |_| {})
    }

    /// Sends a message and reports the delivery outcome to `on_complete`.
    ///
    /// `on_complete` always runs exactly once. A message this role may not
    /// send, an inactive session or an unreachable peer fails fast: the
    /// callback gets the error before it is returned, and nothing is sent.
    pub fn send_with<F>(&self, message: &SyncMessage, on_complete: F) -> SyncResult<()>
    where
        F: FnOnce(&SyncResult<()>) + Send + 'static,
    {
        let kind = message.kind();
        if !kind.may_be_sent_by(self.role) {
            let err = SyncError::UnexpectedMessage {
                kind,
                role: self.role,
            };
            on_complete(&Err(err.clone()));
            return Err(err);
        }

        let precheck = if self.activation() != ActivationState::Activated {
            Err(SyncError::SessionNotActivated)
        } else if !self.transport.is_reachable() {
            Err(SyncError::NotReachable)
        } else {
            message.encode().map_err(SyncError::from)
        };
        let payload = match precheck {
            Ok(payload) => payload,
            Err(err) => {
                let failed = Err(err.clone());
                record_outcome(&self.state, &self.stats, &self.config, kind, &failed);
                on_complete(&failed);
                return Err(err);
            }
        };

        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let config = self.config.clone();
        self.transport.send(
            payload,
            Box::new(move |result| {
                record_outcome(&state, &stats, &config, kind, &result);
                on_complete(&result);
            }),
        );
        Ok(())
    }

    /// Records a locally applied snapshot as a completed sync.
    pub(crate) fn mark_snapshot_applied(&self) {
        {
            let mut state = self.state.write();
            state.last_sync_succeeded = Some(true);
            state.last_sync_at = Some(Timestamp::now());
            state.last_error = None;
        }
        self.stats.write().snapshots_applied += 1;
    }

    /// Counts an inbound message discarded without effect.
    pub(crate) fn note_dropped(&self) {
        self.stats.write().messages_dropped += 1;
    }

    /// Records an error that did not come from a send.
    pub(crate) fn note_error(&self, error: &SyncError) {
        self.state.write().last_error = Some(error.to_string());
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        let state = self.state.read();
        SyncStatus {
            activation: state.activation,
            is_reachable: self.transport.is_reachable(),
            last_sync_succeeded: state.last_sync_succeeded,
            last_sync_at: state.last_sync_at,
            last_error: state.last_error.clone(),
        }
    }

    /// Traffic counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }
}

/// Sends that start or complete a sync round.
fn is_sync_round(kind: MessageKind) -> bool {
    matches!(kind, MessageKind::RequestSync | MessageKind::TrivitsSync)
}

fn record_outcome(
    state: &RwLock<SessionState>,
    stats: &RwLock<SyncStats>,
    config: &SyncConfig,
    kind: MessageKind,
    result: &SyncResult<()>,
) {
    match result {
        Ok(()) => {
            stats.write().messages_sent += 1;
            if kind == MessageKind::TrivitsSync {
                let mut state = state.write();
                state.last_sync_succeeded = Some(true);
                state.last_sync_at = Some(Timestamp::now());
                state.last_error = None;
            }
            debug!(device = %config.device_name, %kind, "message sent");
        }
        Err(err) => {
            stats.write().send_failures += 1;
            let mut state = state.write();
            state.last_error = Some(err.to_string());
            if is_sync_round(kind) {
                state.last_sync_succeeded = Some(false);
            }
            warn!(device = %config.device_name, %kind, error = %err, "send failed");
        }
    }
}

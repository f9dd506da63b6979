//! In-memory session link between two replicas.

use crate::error::SyncError;
use crate::transport::{SendCompletion, SessionEvent, SessionTransport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use trivit_sync_protocol::Role;

struct LinkState {
    reachable: AtomicBool,
    fail_activation: AtomicBool,
    delivered: AtomicU64,
    primary_events: UnboundedSender<SessionEvent>,
    secondary_events: UnboundedSender<SessionEvent>,
}

impl LinkState {
    fn events(&self, role: Role) -> &UnboundedSender<SessionEvent> {
        match role {
            Role::Primary => &self.primary_events,
            Role::Secondary => &self.secondary_events,
        }
    }

    /// Events for a side whose receiver is gone are discarded.
    fn notify(&self, role: Role, event: SessionEvent) {
        if self.events(role).send(event).is_err() {
            debug!(%role, "event receiver closed");
        }
    }
}

/// Controls a pair of [`LoopbackTransport`]s.
///
/// Delivers encoded payloads straight into the peer's event channel.
/// Reachability is shared by both sides.
#[derive(Clone)]
pub struct LoopbackLink {
    state: Arc<LinkState>,
}

/// Both ends of a loopback link with their event streams.
pub struct LoopbackPair {
    /// Link controls.
    pub link: LoopbackLink,
    /// Transport for the primary.
    pub primary: LoopbackTransport,
    /// Events for the primary.
    pub primary_events: UnboundedReceiver<SessionEvent>,
    /// Transport for the secondary.
    pub secondary: LoopbackTransport,
    /// Events for the secondary.
    pub secondary_events: UnboundedReceiver<SessionEvent>,
}

impl LoopbackLink {
    /// Creates a connected pair of transports.
    pub fn pair(reachable: bool) -> LoopbackPair {
        let (primary_tx, primary_events) = mpsc::unbounded_channel();
        let (secondary_tx, secondary_events) = mpsc::unbounded_channel();
        let state = Arc::new(LinkState {
            reachable: AtomicBool::new(reachable),
            fail_activation: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            primary_events: primary_tx,
            secondary_events: secondary_tx,
        });

        LoopbackPair {
            link: LoopbackLink {
                state: Arc::clone(&state),
            },
            primary: LoopbackTransport {
                role: Role::Primary,
                state: Arc::clone(&state),
            },
            primary_events,
            secondary: LoopbackTransport {
                role: Role::Secondary,
                state,
            },
            secondary_events,
        }
    }

    /// Changes reachability, notifying both sides on a transition.
    pub fn set_reachable(&self, reachable: bool) {
        let previous = self.state.reachable.swap(reachable, Ordering::SeqCst);
        if previous != reachable {
            debug!(reachable, "loopback reachability changed");
            self.state
                .notify(Role::Primary, SessionEvent::ReachabilityChanged(reachable));
            self.state
                .notify(Role::Secondary, SessionEvent::ReachabilityChanged(reachable));
        }
    }

    /// Whether the two sides can currently exchange messages.
    pub fn is_reachable(&self) -> bool {
        self.state.reachable.load(Ordering::SeqCst)
    }

    /// Makes subsequent activations fail.
    pub fn set_fail_activation(&self, fail: bool) {
        self.state.fail_activation.store(fail, Ordering::SeqCst);
    }

    /// Deactivates one side's session, as the platform does on a
    /// device switch.
    pub fn deactivate(&self, role: Role) {
        self.state.notify(role, SessionEvent::BecameInactive);
        self.state.notify(role, SessionEvent::Deactivated);
    }

    /// Number of payloads delivered in either direction.
    pub fn delivered_count(&self) -> u64 {
        self.state.delivered.load(Ordering::SeqCst)
    }
}

/// One end of a [`LoopbackLink`].
#[derive(Clone)]
pub struct LoopbackTransport {
    role: Role,
    state: Arc<LinkState>,
}

impl LoopbackTransport {
    /// The role this end belongs to.
    pub fn role(&self) -> Role {
        self.role
    }
}

impl SessionTransport for LoopbackTransport {
    fn activate(&self) {
        let event = if self.state.fail_activation.load(Ordering::SeqCst) {
            SessionEvent::ActivationFailed("activation refused".into())
        } else {
            SessionEvent::Activated
        };
        self.state.notify(self.role, event);
    }

    fn is_reachable(&self) -> bool {
        self.state.reachable.load(Ordering::SeqCst)
    }

    fn send(&self, payload: Vec<u8>, on_complete: SendCompletion) {
        if !self.is_reachable() {
            on_complete(Err(SyncError::NotReachable));
            return;
        }
        let peer = self.state.events(self.role.peer());
        match peer.send(SessionEvent::MessageReceived(payload)) {
            Ok(()) => {
                self.state.delivered.fetch_add(1, Ordering::SeqCst);
                on_complete(Ok(()));
            }
            Err(_) => on_complete(Err(SyncError::transport_fatal("peer session closed"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncResult;
    use parking_lot::Mutex;

    fn send(transport: &LoopbackTransport, payload: Vec<u8>) -> SyncResult<()> {
        let outcome = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&outcome);
        transport.send(payload, Box::new(move |result| *slot.lock() = Some(result)));
        let result = outcome.lock().take();
        result.unwrap()
    }

    #[test]
    fn delivers_to_peer() {
        let mut pair = LoopbackLink::pair(true);
        send(&pair.secondary, vec![1, 2, 3]).unwrap();

        assert_eq!(
            pair.primary_events.try_recv().unwrap(),
            SessionEvent::MessageReceived(vec![1, 2, 3])
        );
        assert!(pair.secondary_events.try_recv().is_err());
        assert_eq!(pair.link.delivered_count(), 1);
    }

    #[test]
    fn unreachable_link_fails_fast() {
        let mut pair = LoopbackLink::pair(false);
        assert_eq!(send(&pair.primary, vec![1]), Err(SyncError::NotReachable));
        assert!(pair.secondary_events.try_recv().is_err());
    }

    #[test]
    fn reachability_transitions_notify_both_sides() {
        let mut pair = LoopbackLink::pair(false);
        pair.link.set_reachable(true);
        pair.link.set_reachable(true);

        assert_eq!(
            pair.primary_events.try_recv().unwrap(),
            SessionEvent::ReachabilityChanged(true)
        );
        assert_eq!(
            pair.secondary_events.try_recv().unwrap(),
            SessionEvent::ReachabilityChanged(true)
        );
        assert!(pair.primary_events.try_recv().is_err());
    }

    #[test]
    fn activation_reports_to_own_side() {
        let mut pair = LoopbackLink::pair(true);
        pair.primary.activate();
        assert_eq!(pair.primary_events.try_recv().unwrap(), SessionEvent::Activated);

        pair.link.set_fail_activation(true);
        pair.secondary.activate();
        assert!(matches!(
            pair.secondary_events.try_recv().unwrap(),
            SessionEvent::ActivationFailed(_)
        ));
    }

    #[test]
    fn closed_peer_is_fatal() {
        let pair = LoopbackLink::pair(true);
        drop(pair.primary_events);
        let err = send(&pair.secondary, vec![1]).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn deactivate_emits_both_events() {
        let mut pair = LoopbackLink::pair(true);
        pair.link.deactivate(Role::Secondary);
        assert_eq!(
            pair.secondary_events.try_recv().unwrap(),
            SessionEvent::BecameInactive
        );
        assert_eq!(
            pair.secondary_events.try_recv().unwrap(),
            SessionEvent::Deactivated
        );
    }
}

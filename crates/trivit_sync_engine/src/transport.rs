//! Session transport abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use trivit_sync_protocol::SyncMessage;

/// Callback invoked once a send has been delivered or has failed.
pub type SendCompletion = Box<dyn FnOnce(SyncResult<()>) + Send>;

/// A message-oriented link to the paired device.
///
/// Sends are fire-and-forget with a completion callback. Nothing is
/// queued: a send while the peer is unreachable fails immediately.
/// Inbound traffic and state changes are reported separately as
/// [`SessionEvent`]s.
pub trait SessionTransport: Send + Sync {
    /// Starts (or restarts) activation. Completion arrives as an event.
    fn activate(&self);

    /// Whether the peer is currently reachable.
    fn is_reachable(&self) -> bool;

    /// Sends one encoded payload.
    fn send(&self, payload: Vec<u8>, on_complete: SendCompletion);
}

impl<T: SessionTransport + ?Sized> SessionTransport for Arc<T> {
    fn activate(&self) {
        (**self).activate();
    }

    fn is_reachable(&self) -> bool {
        (**self).is_reachable()
    }

    fn send(&self, payload: Vec<u8>, on_complete: SendCompletion) {
        (**self).send(payload, on_complete);
    }
}

/// Events reported by the platform session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Activation completed.
    Activated,
    /// Activation failed.
    ActivationFailed(String),
    /// The session is about to deactivate.
    BecameInactive,
    /// The session deactivated.
    Deactivated,
    /// Peer reachability changed.
    ReachabilityChanged(bool),
    /// An encoded payload arrived from the peer.
    MessageReceived(Vec<u8>),
}

/// A transport that records what is sent, for testing.
#[derive(Debug)]
pub struct RecordingTransport {
    reachable: AtomicBool,
    fail_sends: AtomicBool,
    activations: AtomicU64,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingTransport {
    /// Creates a transport with the given reachability.
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            fail_sends: AtomicBool::new(false),
            activations: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Sets reachability.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes sends fail with a transport error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of activation attempts.
    pub fn activation_count(&self) -> u64 {
        self.activations.load(Ordering::SeqCst)
    }

    /// Raw payloads delivered so far.
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Delivered payloads, decoded.
    pub fn sent_messages(&self) -> Vec<SyncMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|bytes| SyncMessage::decode(bytes).ok())
            .collect()
    }

    /// Drains and decodes delivered payloads.
    pub fn take_sent(&self) -> Vec<SyncMessage> {
        std::mem::take(&mut *self.sent.lock())
            .iter()
            .filter_map(|bytes| SyncMessage::decode(bytes).ok())
            .collect()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SessionTransport for RecordingTransport {
    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn send(&self, payload: Vec<u8>, on_complete: SendCompletion) {
        if !self.is_reachable() {
            on_complete(Err(SyncError::NotReachable));
            return;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            on_complete(Err(SyncError::transport_retryable("delivery failed")));
            return;
        }
        self.sent.lock().push(payload);
        on_complete(Ok(()));
    }
}

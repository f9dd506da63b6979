//! # Trivit Sync Engine
//!
//! Keeps the phone's and the watch's counter sets consistent over an
//! intermittently reachable, message-oriented session.
//!
//! This crate provides:
//! - The record store contract the engines persist through
//! - A session wrapper (activation, reachability, fail-fast sends)
//! - The primary (phone) and secondary (watch) sync engines
//! - An in-memory loopback link connecting two engines
//! - A single-task tokio runtime that serializes all engine work
//!
//! ## Architecture
//!
//! The phone is the source of truth. On reconnect the watch requests a
//! full snapshot and the phone offers one; the watch reconciles by
//! diffing ids. Between snapshots, single updates and deletions flow in
//! both directions, best-effort.
//!
//! ## Key Invariants
//!
//! - A snapshot contains exactly the primary's non-deleted counters
//! - After applying a snapshot the secondary holds exactly its counters
//! - Updates are whole-record overwrites, so replaying one is harmless
//! - Nothing is queued while the peer is unreachable; the next
//!   reachability transition triggers a fresh sync
//! - Transport and decode failures are logged, never propagated

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod loopback;
mod primary;
mod runtime;
mod secondary;
mod session;
mod store;
mod transport;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use loopback::{LoopbackLink, LoopbackPair, LoopbackTransport};
pub use primary::PrimaryEngine;
pub use runtime::{spawn_replica, Replica, SyncHandle};
pub use secondary::SecondaryEngine;
pub use session::{ActivationState, Session, Signal, SyncStats, SyncStatus, TriggerReason};
pub use store::{CounterStore, MemoryCounterStore, StoreError, StoreResult};
pub use transport::{RecordingTransport, SendCompletion, SessionEvent, SessionTransport};

//! Connection registry — correlates asynchronous "context ready"
//! signals with the sandbox awaiting them.
//!
//! Keyed by context identity rather than by captured closures, so that
//! many sandboxes created in a tight loop cannot alias each other's
//! pending state. An entry is registered before its context is attached
//! (before it can possibly signal) and removed once both phases have
//! resolved or the sandbox terminates; resolutions for unknown ids are
//! ignored, not errors.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::types::ContextId;

/// The two readiness phases of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loaded,
    Connected,
}

/// Write-once pending futures for one context. Resolving a phase twice
/// is a no-op, not an error.
#[derive(Debug)]
struct PendingConnection {
    loaded: watch::Sender<bool>,
    connected: watch::Sender<bool>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    pending: Mutex<HashMap<ContextId, PendingConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register pending state for a context and hand back the two
    /// read-many receivers. Must happen before the context is attached.
    pub fn register(&self, id: ContextId) -> (watch::Receiver<bool>, watch::Receiver<bool>) {
        let (loaded_tx, loaded_rx) = watch::channel(false);
        let (connected_tx, connected_rx) = watch::channel(false);
        self.pending.lock().unwrap().insert(
            id,
            PendingConnection {
                loaded: loaded_tx,
                connected: connected_tx,
            },
        );
        (loaded_rx, connected_rx)
    }

    /// Resolve one phase for a context, by identity. Returns `false`
    /// when no pending entry exists (already resolved and collected,
    /// terminated, or never registered) — callers treat that as
    /// "ignore", per the handshake protocol.
    pub fn resolve(&self, id: ContextId, phase: Phase) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let Some(entry) = pending.get(&id) else {
            return false;
        };
        match phase {
            Phase::Loaded => entry.loaded.send_replace(true),
            Phase::Connected => entry.connected.send_replace(true),
        };
        // Receivers hold the final values; once both phases are in,
        // the correlation state has done its job.
        if *entry.loaded.borrow() && *entry.connected.borrow() {
            pending.remove(&id);
        }
        true
    }

    /// Drop the pending entry for a terminated context. Signals arriving
    /// afterwards resolve nothing.
    pub fn remove(&self, id: ContextId) -> bool {
        self.pending.lock().unwrap().remove(&id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

//! Signal bus — the shared broadcast surface between host and contexts.
//!
//! Plays the role of the host page's global message target: every
//! context emits its lifecycle signals here, tagged with its own
//! `ContextId` as the claimed source, and host-side listeners filter by
//! that identity. Listeners live in a per-sandbox `ListenerSet` so that
//! termination can tear them down as a unit; a leaked listener would be
//! a permanent per-session subscription.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use crate::types::ContextId;

const BUS_CAPACITY: usize = 256;

/// A signal crossing the isolation boundary.
#[derive(Debug, Clone)]
pub struct Signal {
    /// The emitting context's claim of identity. Checked against the
    /// expected context handle before a signal is accepted; a mismatch
    /// is ignored, never an error.
    pub source: ContextId,
    pub body: SignalBody,
}

#[derive(Debug, Clone)]
pub enum SignalBody {
    /// Opaque handshake constant ("bootstrap loaded" or "capabilities
    /// connected", session-suffixed).
    Handshake(String),
    /// An exception raised inside the context, delivered as data. Never
    /// thrown across the boundary.
    Exception(String),
    /// The context element finished loading its current (blank)
    /// document and can be redirected at the bootstrap.
    ElementLoaded,
}

#[derive(Debug, Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<Signal>,
}

impl SignalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Broadcast a signal. Delivery to zero listeners is fine; contexts
    /// keep signalling even when nobody is left to care.
    pub fn emit(&self, source: ContextId, body: SignalBody) {
        let _ = self.tx.send(Signal { source, body });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Listener registry ───────────────────────────────────────────────

/// Per-sandbox registry of the signal listeners wired on its behalf.
///
/// Registration happens before the context can possibly emit, removal
/// happens as a unit at terminate. Aborting a listener whose task has
/// already finished (one-shot listeners remove themselves on first
/// acceptance) is a no-op, which makes termination idempotent by
/// construction.
#[derive(Debug, Default)]
pub struct ListenerSet {
    entries: Mutex<Vec<Listener>>,
}

#[derive(Debug)]
struct Listener {
    label: &'static str,
    abort: AbortHandle,
}

impl ListenerSet {
    /// Spawn a listener task and record it for teardown.
    pub fn attach<F>(&self, label: &'static str, listener: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(listener);
        self.entries.lock().unwrap().push(Listener {
            label,
            abort: handle.abort_handle(),
        });
    }

    /// Abort every registered listener. Safe to call repeatedly and
    /// safe when some listeners were never attached.
    pub fn detach_all(&self) {
        for listener in self.entries.lock().unwrap().drain(..) {
            tracing::debug!(listener = listener.label, "detaching signal listener");
            listener.abort.abort();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

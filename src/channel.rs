//! Channel pairs — the message-passing primitive backing capabilities.
//!
//! One pair has two endpoints; during connection one endpoint is
//! transferred into the isolation context while the host keeps the
//! other. Once the handshake completes, host and guest exchange
//! messages over these endpoints directly and the lifecycle layer no
//! longer participates.

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

/// One endpoint of a channel pair. Payloads are JSON values; message
/// semantics on top of an established channel belong to the service
/// layer, not to this crate.
#[derive(Debug)]
pub struct MessagePort {
    tx: mpsc::UnboundedSender<Value>,
    rx: Mutex<mpsc::UnboundedReceiver<Value>>,
}

impl MessagePort {
    /// Create a connected pair of endpoints.
    pub fn pair() -> (MessagePort, MessagePort) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MessagePort {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            MessagePort {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }

    /// Post a message to the far endpoint. Returns `false` when the far
    /// endpoint has been dropped; posting to a torn-down context is not
    /// an error.
    pub fn post(&self, message: Value) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Receive the next message, or `None` once the far endpoint is
    /// gone and the queue is drained.
    pub async fn recv(&self) -> Option<Value> {
        self.rx.lock().await.recv().await
    }
}

/// A channel endpoint earmarked for one named capability. The collection
/// handed to `connect_ports` wraps the endpoints destined for the guest;
/// the adapter extracts the raw ports and transmits them.
#[derive(Debug)]
pub struct CapabilityPort {
    pub capability: String,
    pub port: MessagePort,
}

impl CapabilityPort {
    pub fn new(capability: impl Into<String>, port: MessagePort) -> Self {
        Self {
            capability: capability.into(),
            port,
        }
    }
}

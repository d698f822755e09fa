//! Guest programs — the untrusted side of a connected sandbox.
//!
//! A target registration may carry a guest implementation; the frame
//! backend runs it inside the context task once the handshake has
//! completed, handing it the capability ports that were transferred in.

use async_trait::async_trait;
use url::Url;

use crate::bus::{SignalBus, SignalBody};
use crate::channel::{CapabilityPort, MessagePort};
use crate::types::ContextId;

/// Everything a guest can see of its own context: its assigned name,
/// the base URL its resources resolve against, and the wired ports.
pub struct GuestContext {
    name: String,
    base: Url,
    ports: Vec<CapabilityPort>,
    bus: SignalBus,
    id: ContextId,
}

impl GuestContext {
    pub(crate) fn new(
        name: String,
        base: Url,
        ports: Vec<CapabilityPort>,
        bus: SignalBus,
        id: ContextId,
    ) -> Self {
        Self {
            name,
            base,
            ports,
            bus,
            id,
        }
    }

    /// The context's own identifier, mainly for debugging.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Claim the port backing one capability. `None` when the host
    /// granted no such capability.
    pub fn take_port(&mut self, capability: &str) -> Option<MessagePort> {
        let idx = self
            .ports
            .iter()
            .position(|p| p.capability == capability)?;
        Some(self.ports.remove(idx).port)
    }

    pub fn capabilities(&self) -> Vec<&str> {
        self.ports.iter().map(|p| p.capability.as_str()).collect()
    }

    /// Report an internal exception to the creator. Delivered as data
    /// over the signal channel and surfaced through the sandbox's
    /// `on_error` handler; nothing is thrown across the boundary.
    pub fn raise(&self, description: impl Into<String>) {
        self.bus
            .emit(self.id, SignalBody::Exception(description.into()));
    }
}

/// A guest program. `run` is invoked inside the context task after the
/// capabilities-connected signal has been announced.
#[async_trait]
pub trait Guest: Send + Sync {
    async fn run(&self, ctx: GuestContext);
}

use std::sync::Arc;

use tokio::sync::watch;

use crate::channel::CapabilityPort;
use crate::error::SandboxError;
use crate::sandbox::Sandbox;
use crate::types::ContextBinding;

/// What `initialize_sandbox` hands back: the context binding plus the
/// two armed pending futures. `loaded` resolves once the context
/// signals its bootstrap has loaded, `connected` once it signals its
/// ports are wired.
#[derive(Debug)]
pub struct InitializedContext {
    pub binding: ContextBinding,
    pub loaded: watch::Receiver<bool>,
    pub connected: watch::Receiver<bool>,
}

/// Backend driver for one kind of isolation context.
///
/// The sandbox owns the lifecycle and the protocol invariants; the
/// adapter owns the backend resource and the primitive operations on
/// it. One adapter instance serves every sandbox of its host.
///
/// Operations a backend cannot express should return
/// `SandboxError::Unsupported` from `initialize_sandbox` — nothing may
/// be allocated on the failure path.
pub trait IsolationAdapter: Send + Sync {
    /// Verify isolation safety, allocate the context handle, apply
    /// isolation flags, wire the error and handshake listeners scoped
    /// to that handle, and begin whatever bootstrap sequence the
    /// sandbox kind requires. Fatal configuration and security errors
    /// surface here, synchronously, with no context left behind.
    fn initialize_sandbox(
        &self,
        sandbox: &Arc<Sandbox>,
    ) -> Result<InitializedContext, SandboxError>;

    /// Attach the context so the backend begins executing it. Called
    /// exactly once per sandbox; `Sandbox::start` guards repeats.
    fn start_sandbox(&self, sandbox: &Sandbox) -> Result<(), SandboxError>;

    /// Mark the sandbox terminated, remove every listener registered on
    /// its behalf, drop the pending-connection entry, and discard the
    /// context handle. Safe to call when listeners were never attached.
    fn terminate_sandbox(&self, sandbox: &Sandbox);

    /// Transmit the capability ports into the context, tagged with the
    /// initialization message. A silent no-op when the sandbox has
    /// already been terminated: an in-flight connect racing a fast
    /// terminate must not hand ports to a dying context.
    fn connect_ports(
        &self,
        sandbox: &Sandbox,
        ports: Vec<CapabilityPort>,
    ) -> Result<(), SandboxError>;

    /// The context handle's assigned debug name.
    fn name(&self, sandbox: &Sandbox) -> Option<String>;

    /// Whether this backend can express "isolated but same-origin".
    /// Backends that cannot force the cross-origin safety check onto
    /// every creation.
    fn strict_isolation(&self) -> bool;
}

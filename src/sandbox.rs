//! Sandbox lifecycle.
//!
//! One `Sandbox` owns one isolation context's lifecycle: `created →
//! initializing → loaded → connected`, with `terminated` reachable from
//! any non-terminal state. The sandbox enforces ordering, idempotence,
//! and termination safety; the backend primitives live on its adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use url::Url;
use uuid::Uuid;

use crate::adapter::IsolationAdapter;
use crate::channel::CapabilityPort;
use crate::config::SharedConfiguration;
use crate::error::SandboxError;
use crate::registry::Phase;
use crate::types::{ContextBinding, LifecycleState, SandboxId, SandboxKind};

/// Invoked when the context reports an internal exception. Errors from
/// inside the isolation boundary arrive here as data; the default
/// handler ignores them.
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

pub struct Sandbox {
    id: SandboxId,
    kind: SandboxKind,
    url: String,
    resolved_url: Url,
    capabilities: Vec<String>,
    dependencies: Vec<String>,
    adapter: Arc<dyn IsolationAdapter>,
    config: SharedConfiguration,
    state: Mutex<LifecycleState>,
    context: Mutex<Option<ContextBinding>>,
    loaded: Mutex<Option<watch::Receiver<bool>>>,
    connected: Mutex<Option<watch::Receiver<bool>>>,
    on_error: Mutex<ErrorHandler>,
    terminated: AtomicBool,
}

impl Sandbox {
    pub(crate) fn new(
        kind: SandboxKind,
        url: String,
        resolved_url: Url,
        capabilities: Vec<String>,
        dependencies: Vec<String>,
        adapter: Arc<dyn IsolationAdapter>,
        config: SharedConfiguration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: format!("sbx-{}", Uuid::new_v4().simple()),
            kind,
            url,
            resolved_url,
            capabilities,
            dependencies,
            adapter,
            config,
            state: Mutex::new(LifecycleState::Created),
            context: Mutex::new(None),
            loaded: Mutex::new(None),
            connected: Mutex::new(None),
            on_error: Mutex::new(Arc::new(|_| {})),
            terminated: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SandboxKind {
        self.kind
    }

    /// The target URL exactly as given at creation.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The target URL resolved against the host origin.
    pub fn resolved_url(&self) -> &Url {
        &self.resolved_url
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn configuration(&self) -> &SharedConfiguration {
        &self.config
    }

    /// The sandbox's view of its context, once initialized.
    pub fn context(&self) -> Option<ContextBinding> {
        self.context.lock().unwrap().clone()
    }

    pub(crate) fn context_id(&self) -> Option<crate::types::ContextId> {
        self.context.lock().unwrap().as_ref().map(|b| b.id)
    }

    /// The context handle's assigned name, per the adapter.
    pub fn name(&self) -> Option<String> {
        self.adapter.name(self)
    }

    /// Create and attach the isolation context.
    ///
    /// Fatal configuration and security errors return synchronously and
    /// leave no context behind; the sandbox is then permanently dead.
    /// Starting twice is an explicit error.
    pub fn start(self: &Arc<Self>) -> Result<(), SandboxError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                LifecycleState::Created => *state = LifecycleState::Initializing,
                LifecycleState::Terminated => return Err(SandboxError::Terminated),
                _ => return Err(SandboxError::AlreadyStarted),
            }
        }

        let initialized = match self.adapter.initialize_sandbox(self) {
            Ok(initialized) => initialized,
            Err(e) => {
                // Nothing was allocated; the sandbox cannot be retried.
                self.terminated.store(true, Ordering::SeqCst);
                *self.state.lock().unwrap() = LifecycleState::Terminated;
                return Err(e);
            }
        };

        tracing::info!(
            id = %self.id,
            name = %initialized.binding.name,
            kind = ?self.kind,
            "starting sandbox"
        );

        *self.context.lock().unwrap() = Some(initialized.binding);
        *self.loaded.lock().unwrap() = Some(initialized.loaded);
        *self.connected.lock().unwrap() = Some(initialized.connected);

        self.adapter.start_sandbox(self)
    }

    /// Tear the context down and release every listener registered on
    /// this sandbox's behalf. Idempotent; safe to call concurrently
    /// with an in-flight connect — the terminated flag is set before
    /// anything else, so a racing `connect_ports` transmits nothing.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock().unwrap() = LifecycleState::Terminated;
        self.adapter.terminate_sandbox(self);
        *self.context.lock().unwrap() = None;
        tracing::info!(id = %self.id, "sandbox terminated");
    }

    /// Hand the capability ports to the context. Silently absorbed when
    /// the sandbox has already been terminated.
    pub fn connect_ports(&self, ports: Vec<CapabilityPort>) -> Result<(), SandboxError> {
        self.adapter.connect_ports(self, ports)
    }

    /// Resolves once the context signals its bootstrap has loaded.
    /// Waits indefinitely on a context that never signals; callers
    /// needing a watchdog bring their own.
    pub async fn wait_loaded(&self) -> Result<(), SandboxError> {
        self.wait_phase(&self.loaded).await
    }

    /// Resolves once the context signals its ports are wired.
    pub async fn wait_connected(&self) -> Result<(), SandboxError> {
        self.wait_phase(&self.connected).await
    }

    async fn wait_phase(
        &self,
        slot: &Mutex<Option<watch::Receiver<bool>>>,
    ) -> Result<(), SandboxError> {
        let Some(mut rx) = slot.lock().unwrap().clone() else {
            return Err(SandboxError::NotStarted);
        };
        rx.wait_for(|resolved| *resolved)
            .await
            .map(|_| ())
            .map_err(|_| SandboxError::Terminated)
    }

    /// Replace the error handler. The handler sees the exception
    /// descriptions the context reports over the signal channel.
    pub fn set_on_error(&self, handler: impl Fn(String) + Send + Sync + 'static) {
        *self.on_error.lock().unwrap() = Arc::new(handler);
    }

    pub(crate) fn dispatch_error(&self, description: String) {
        tracing::debug!(id = %self.id, error = %description, "context reported exception");
        let handler = self.on_error.lock().unwrap().clone();
        handler(description);
    }

    pub(crate) fn note_phase(&self, phase: Phase) {
        if self.is_terminated() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        match (phase, *state) {
            (Phase::Loaded, LifecycleState::Initializing) => {
                *state = LifecycleState::Loaded;
            }
            (Phase::Connected, LifecycleState::Initializing | LifecycleState::Loaded) => {
                *state = LifecycleState::Connected;
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("state", &self.state())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

//! Frame isolation backend.
//!
//! Drives an in-process "frame" context: a spawned task with an inbox,
//! emitting its lifecycle signals onto the host's signal bus. This is
//! the reference adapter; the host-side half implements the
//! `IsolationAdapter` contract, and `FrameRuntime` is the sandbox-side
//! half (the bootstrap executed inside the context).
//!
//! Handshake, from the host's point of view:
//!   1. initialize — verify isolation safety, allocate the frame, wire
//!      error/loaded/connected listeners scoped to it, register the
//!      pending-connection entry.
//!   2. start — attach the frame so it begins executing. Script-kind
//!      frames come up blank and are redirected at the shared bootstrap
//!      once their element-loaded signal arrives; content-kind frames
//!      point straight at the target document.
//!   3. the frame announces "bootstrap loaded"; the caller supplies
//!      ports; `connect_ports` transmits them with the initialization
//!      message; the frame wires them and announces "capabilities
//!      connected".
//!   4. steady state — host and guest talk over the transferred ports;
//!      this layer is out of the picture until terminate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use url::Url;
use uuid::Uuid;

use crate::adapter::{InitializedContext, IsolationAdapter};
use crate::bus::{ListenerSet, SignalBody, SignalBus};
use crate::channel::{CapabilityPort, MessagePort};
use crate::config::{Configuration, SharedConfiguration};
use crate::error::SandboxError;
use crate::guest::GuestContext;
use crate::host::TargetDirectory;
use crate::loader::{NullFetcher, ScriptLoader};
use crate::registry::{ConnectionRegistry, Phase};
use crate::sandbox::Sandbox;
use crate::types::{
    ContextBinding, ContextId, HandshakeMessages, InitializationMessage, SandboxKind,
    context_name,
};

#[derive(Debug, Clone)]
pub struct FrameAdapterConfig {
    /// Whether this backend supports the strict isolation flag
    /// ("isolated but same-origin"). Legacy backends that do not force
    /// the cross-origin safety check onto every creation.
    pub strict_isolation: bool,
}

impl Default for FrameAdapterConfig {
    fn default() -> Self {
        Self {
            strict_isolation: true,
        }
    }
}

/// Messages delivered into a frame's inbox.
enum FrameMessage {
    /// Point the (blank) frame at a document.
    Navigate(Url),
    /// The host's initialization message plus the transferred ports.
    Initialize {
        message: InitializationMessage,
        ports: Vec<MessagePort>,
    },
}

/// What a frame executes once attached.
enum FrameDocument {
    /// Blank page awaiting redirection at the shared bootstrap.
    Blank,
    /// A complete guest document loaded directly.
    Document(Url),
}

/// Not-yet-attached half of a frame: consumed by `start_sandbox`.
struct PendingFrame {
    rx: mpsc::UnboundedReceiver<FrameMessage>,
    doc: FrameDocument,
}

/// The backend resource for one isolation context. Owned by the
/// adapter on behalf of exactly one sandbox; destroyed exactly once.
struct FrameHandle {
    name: String,
    inbox: mpsc::UnboundedSender<FrameMessage>,
    listeners: ListenerSet,
    task: Option<AbortHandle>,
    boot: Option<PendingFrame>,
    isolation_flags: Vec<&'static str>,
}

pub struct FrameAdapter {
    config: SharedConfiguration,
    registry: Arc<ConnectionRegistry>,
    bus: SignalBus,
    targets: Arc<TargetDirectory>,
    messages: HandshakeMessages,
    frames: Mutex<HashMap<ContextId, FrameHandle>>,
    options: FrameAdapterConfig,
}

impl FrameAdapter {
    pub fn new(
        config: SharedConfiguration,
        registry: Arc<ConnectionRegistry>,
        bus: SignalBus,
        targets: Arc<TargetDirectory>,
        options: FrameAdapterConfig,
    ) -> Self {
        Self {
            config,
            registry,
            bus,
            targets,
            messages: HandshakeMessages::for_session(Uuid::new_v4()),
            frames: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// One-shot listener for a handshake constant from one context.
    /// Removes itself on first acceptance; anything with the wrong
    /// source or payload is ignored, never an error.
    fn attach_handshake_listener(
        &self,
        listeners: &ListenerSet,
        label: &'static str,
        id: ContextId,
        expected: String,
        phase: Phase,
        sandbox: Weak<Sandbox>,
    ) {
        let mut rx = self.bus.subscribe();
        let registry = self.registry.clone();
        let config = self.config.clone();
        listeners.attach(label, async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => {
                        if signal.source != id {
                            continue;
                        }
                        let SignalBody::Handshake(ref message) = signal.body else {
                            continue;
                        };
                        if *message != expected {
                            continue;
                        }
                        let callback = config.read().unwrap().event_callback.clone();
                        callback(Box::new(move || {
                            if registry.resolve(id, phase) {
                                tracing::debug!(context = %id, ?phase, "handshake signal accepted");
                                if let Some(sandbox) = sandbox.upgrade() {
                                    sandbox.note_phase(phase);
                                }
                            }
                        }));
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    #[cfg(test)]
    pub(crate) fn isolation_flags(&self, id: ContextId) -> Option<Vec<&'static str>> {
        self.frames
            .lock()
            .unwrap()
            .get(&id)
            .map(|h| h.isolation_flags.clone())
    }
}

impl IsolationAdapter for FrameAdapter {
    fn initialize_sandbox(
        &self,
        sandbox: &Arc<Sandbox>,
    ) -> Result<InitializedContext, SandboxError> {
        let cfg = self.config.read().unwrap().clone();

        // Safety first: a rejected sandbox must leave nothing behind.
        let doc = match sandbox.kind() {
            SandboxKind::Script => {
                verify_isolation(&cfg, self.options.strict_isolation, &cfg.bootstrap_url)?;
                FrameDocument::Blank
            }
            SandboxKind::Content => {
                verify_isolation(&cfg, self.options.strict_isolation, sandbox.resolved_url())?;
                FrameDocument::Document(sandbox.resolved_url().clone())
            }
            SandboxKind::Worker => {
                return Err(SandboxError::Unsupported(
                    "worker (the frame adapter runs script and content sandboxes)",
                ));
            }
        };

        let id = ContextId::fresh();
        let name = context_name(sandbox.url(), id);

        let mut isolation_flags = vec!["allow-scripts"];
        if cfg.allow_same_origin {
            isolation_flags.push("allow-same-origin");
        }

        // Pending state must exist before the context can possibly
        // signal.
        let (loaded, connected) = self.registry.register(id);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let listeners = ListenerSet::default();

        // Exceptions from inside the context, delivered for the whole
        // lifetime of the frame.
        {
            let mut rx = self.bus.subscribe();
            let weak = Arc::downgrade(sandbox);
            listeners.attach("error", async move {
                loop {
                    match rx.recv().await {
                        Ok(signal) => {
                            if signal.source != id {
                                continue;
                            }
                            let SignalBody::Exception(description) = signal.body else {
                                continue;
                            };
                            let Some(sandbox) = weak.upgrade() else {
                                break;
                            };
                            sandbox.dispatch_error(description);
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        self.attach_handshake_listener(
            &listeners,
            "content-loaded",
            id,
            self.messages.loaded.clone(),
            Phase::Loaded,
            Arc::downgrade(sandbox),
        );
        self.attach_handshake_listener(
            &listeners,
            "initialization",
            id,
            self.messages.connected.clone(),
            Phase::Connected,
            Arc::downgrade(sandbox),
        );

        if matches!(doc, FrameDocument::Blank) {
            // Blank frames get redirected at the shared bootstrap once
            // their element reports loaded.
            let mut rx = self.bus.subscribe();
            let config = self.config.clone();
            let inbox = inbox_tx.clone();
            let bootstrap = cfg.bootstrap_url.clone();
            let frame_name = name.clone();
            listeners.attach("element-load", async move {
                loop {
                    match rx.recv().await {
                        Ok(signal) => {
                            if signal.source != id {
                                continue;
                            }
                            if !matches!(signal.body, SignalBody::ElementLoaded) {
                                continue;
                            }
                            let callback = config.read().unwrap().event_callback.clone();
                            callback(Box::new(move || {
                                tracing::debug!(
                                    name = %frame_name,
                                    "redirecting blank context at the bootstrap"
                                );
                                let _ = inbox.send(FrameMessage::Navigate(bootstrap));
                            }));
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        tracing::info!(
            name = %name,
            flags = ?isolation_flags,
            kind = ?sandbox.kind(),
            "initializing sandbox context"
        );

        self.frames.lock().unwrap().insert(
            id,
            FrameHandle {
                name: name.clone(),
                inbox: inbox_tx,
                listeners,
                task: None,
                boot: Some(PendingFrame { rx: inbox_rx, doc }),
                isolation_flags,
            },
        );

        Ok(InitializedContext {
            binding: ContextBinding { id, name },
            loaded,
            connected,
        })
    }

    fn start_sandbox(&self, sandbox: &Sandbox) -> Result<(), SandboxError> {
        let Some(id) = sandbox.context_id() else {
            return Err(SandboxError::NotStarted);
        };
        let mut frames = self.frames.lock().unwrap();
        let Some(handle) = frames.get_mut(&id) else {
            return Err(SandboxError::NotStarted);
        };
        let Some(pending) = handle.boot.take() else {
            return Err(SandboxError::AlreadyStarted);
        };

        let runtime = FrameRuntime {
            id,
            name: handle.name.clone(),
            target_url: sandbox.url().to_string(),
            bus: self.bus.clone(),
            targets: self.targets.clone(),
            messages: self.messages.clone(),
            rx: pending.rx,
        };
        let task = tokio::spawn(runtime.run(pending.doc));
        handle.task = Some(task.abort_handle());
        tracing::debug!(name = %handle.name, "sandbox context attached");
        Ok(())
    }

    fn terminate_sandbox(&self, sandbox: &Sandbox) {
        let Some(id) = sandbox.context_id() else {
            return;
        };
        let Some(handle) = self.frames.lock().unwrap().remove(&id) else {
            return;
        };
        tracing::info!(name = %handle.name, "terminating sandbox context");
        handle.listeners.detach_all();
        if let Some(task) = handle.task {
            task.abort();
        }
        self.registry.remove(id);
    }

    fn connect_ports(
        &self,
        sandbox: &Sandbox,
        ports: Vec<CapabilityPort>,
    ) -> Result<(), SandboxError> {
        // Checked at the point of transmission: an in-flight connect
        // racing a fast terminate must not reach a dying context.
        if sandbox.is_terminated() {
            tracing::debug!(id = %sandbox.id(), "connect_ports after terminate ignored");
            return Ok(());
        }
        let Some(id) = sandbox.context_id() else {
            return Err(SandboxError::NotStarted);
        };
        let frames = self.frames.lock().unwrap();
        let Some(handle) = frames.get(&id) else {
            return Ok(());
        };

        let mut script_urls = Vec::with_capacity(sandbox.dependencies().len() + 1);
        if sandbox.kind() == SandboxKind::Script {
            // The target itself loads first, then its dependencies.
            script_urls.push(sandbox.url().to_string());
        }
        script_urls.extend(sandbox.dependencies().iter().cloned());

        // Base is the directory the raw target URL was given relative
        // to, so the context resolves the prepended target (and any
        // relative dependency) to exactly what the creator resolved.
        let base = base_of(&sandbox.configuration().read().unwrap().host_origin);

        let message = InitializationMessage {
            is_initialization: true,
            capabilities: ports.iter().map(|p| p.capability.clone()).collect(),
            base,
            script_urls,
        };
        tracing::debug!(
            name = %handle.name,
            capabilities = ?message.capabilities,
            "transmitting ports to context"
        );

        let raw_ports: Vec<MessagePort> = ports.into_iter().map(|p| p.port).collect();
        // The frame may have exited on its own; an unread transmission
        // is absorbed, same as one to a terminated sandbox.
        let _ = handle.inbox.send(FrameMessage::Initialize {
            message,
            ports: raw_ports,
        });
        Ok(())
    }

    fn name(&self, sandbox: &Sandbox) -> Option<String> {
        let id = sandbox.context_id()?;
        self.frames
            .lock()
            .unwrap()
            .get(&id)
            .map(|h| h.name.clone())
    }

    fn strict_isolation(&self) -> bool {
        self.options.strict_isolation
    }
}

/// The directory portion of a URL; relative script URLs resolve
/// against it.
fn base_of(url: &Url) -> Url {
    url.join(".").unwrap_or_else(|_| url.clone())
}

/// Refuse to isolate content that would share the host's origin, on
/// backends (or in configurations) that cannot express "isolated but
/// same-origin". Runs before any context resource exists.
fn verify_isolation(
    config: &Configuration,
    strict_isolation: bool,
    target: &Url,
) -> Result<(), SandboxError> {
    let check_required = (config.allow_same_origin && strict_isolation) || !strict_isolation;
    if check_required && target.origin() == config.host_origin.origin() {
        return Err(SandboxError::Security(format!(
            "sandbox target {target} shares the host origin; serve sandboxed content \
             from a separate origin or drop allow_same_origin"
        )));
    }
    Ok(())
}

// ── Sandbox-side runtime ────────────────────────────────────────────

/// The bootstrap half of the adapter contract, executed inside the
/// isolated context task: announce readiness back to the creator, load
/// dependency scripts, wire the transferred ports, run the guest.
struct FrameRuntime {
    id: ContextId,
    name: String,
    /// Raw target URL; the key guest registrations are looked up under.
    target_url: String,
    bus: SignalBus,
    targets: Arc<TargetDirectory>,
    messages: HandshakeMessages,
    rx: mpsc::UnboundedReceiver<FrameMessage>,
}

impl FrameRuntime {
    async fn run(mut self, doc: FrameDocument) {
        match doc {
            FrameDocument::Blank => {
                self.bus.emit(self.id, SignalBody::ElementLoaded);
                // The creator redirects us at the shared bootstrap.
                let bootstrap = loop {
                    match self.rx.recv().await {
                        Some(FrameMessage::Navigate(url)) => break url,
                        Some(_) => continue,
                        None => return,
                    }
                };
                self.run_bootstrap(bootstrap).await;
            }
            FrameDocument::Document(url) => {
                if !self.targets.is_registered(&self.target_url) {
                    // A direct document without the bootstrap never
                    // joins the handshake; the creator waits forever.
                    tracing::debug!(name = %self.name, "content document has no bootstrap");
                    return;
                }
                self.run_bootstrap(url).await;
            }
        }
    }

    async fn run_bootstrap(mut self, document_url: Url) {
        tracing::debug!(name = %self.name, document = %document_url, "bootstrap loaded");
        self.bus
            .emit(self.id, SignalBody::Handshake(self.messages.loaded.clone()));

        // First initialization wins; the lifecycle layer ignores
        // replays and the inbox is dropped with this task.
        let (message, ports) = loop {
            match self.rx.recv().await {
                Some(FrameMessage::Initialize { message, ports }) if message.is_initialization => {
                    break (message, ports);
                }
                Some(_) => continue,
                None => return,
            }
        };

        let loader = ScriptLoader::new(message.base.clone(), document_url);
        if let Err(violation) = loader.load(&message.script_urls, &NullFetcher).await {
            tracing::warn!(
                name = %self.name,
                url = %violation.url,
                "dependency script rejected, aborting load"
            );
            self.bus
                .emit(self.id, SignalBody::Exception(violation.description));
            return;
        }

        let ports = message
            .capabilities
            .iter()
            .cloned()
            .zip(ports)
            .map(|(capability, port)| CapabilityPort { capability, port })
            .collect();
        let ctx = GuestContext::new(
            self.name.clone(),
            message.base.clone(),
            ports,
            self.bus.clone(),
            self.id,
        );

        self.bus.emit(
            self.id,
            SignalBody::Handshake(self.messages.connected.clone()),
        );

        if let Some(guest) = self.targets.guest_for(&self.target_url) {
            guest.run(ctx).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::Guest;
    use crate::host::{Host, HostConfig, TargetRegistration};
    use crate::types::{LifecycleState, SandboxSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(100);

    fn trace_init() {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("oubliette=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }

    fn test_host() -> Host {
        trace_init();
        Host::new(HostConfig::new(
            Url::parse("https://host.example/").unwrap(),
            Url::parse("https://cdn.example/bootstrap.html").unwrap(),
        ))
    }

    fn legacy_host() -> Host {
        trace_init();
        let mut cfg = HostConfig::new(
            Url::parse("https://host.example/").unwrap(),
            Url::parse("https://cdn.example/bootstrap.html").unwrap(),
        );
        cfg.frame.strict_isolation = false;
        Host::new(cfg)
    }

    struct EchoGuest;

    #[async_trait]
    impl Guest for EchoGuest {
        async fn run(&self, mut ctx: GuestContext) {
            if let Some(port) = ctx.take_port("assertions") {
                port.post(json!("ok"));
            }
        }
    }

    struct BoomGuest;

    #[async_trait]
    impl Guest for BoomGuest {
        async fn run(&self, ctx: GuestContext) {
            ctx.raise("boom");
        }
    }

    /// Reports the base URL the context was initialized with.
    struct BaseReportingGuest;

    #[async_trait]
    impl Guest for BaseReportingGuest {
        async fn run(&self, mut ctx: GuestContext) {
            let base = ctx.base().to_string();
            if let Some(port) = ctx.take_port("assertions") {
                port.post(json!(base));
            }
        }
    }

    /// Full script-kind handshake against a registered target.
    async fn connect(host: &Host, url: &str) -> (Arc<Sandbox>, MessagePort) {
        let sandbox = host
            .create_sandbox(SandboxSpec::script(url))
            .unwrap();
        sandbox.start().unwrap();
        sandbox.wait_loaded().await.unwrap();

        let (host_end, guest_end) = MessagePort::pair();
        sandbox
            .connect_ports(vec![CapabilityPort::new("assertions", guest_end)])
            .unwrap();
        sandbox.wait_connected().await.unwrap();
        (sandbox, host_end)
    }

    #[tokio::test]
    async fn contexts_are_uniquely_named() {
        let host = test_host();
        host.register(TargetRegistration::new("fixtures/index.html", vec![]));

        let a = host
            .create_sandbox(SandboxSpec::script("fixtures/index.html"))
            .unwrap();
        let b = host
            .create_sandbox(SandboxSpec::script("fixtures/index.html"))
            .unwrap();
        a.start().unwrap();
        b.start().unwrap();

        let name_a = a.name().unwrap();
        let name_b = b.name().unwrap();
        assert_ne!(name_a, name_b);
        assert!(name_a.contains("fixtures/index.html"));
        assert!(name_b.contains("fixtures/index.html"));
    }

    #[tokio::test]
    async fn name_matches_the_context_binding() {
        let host = test_host();
        let sandbox = host
            .create_sandbox(SandboxSpec::script("fixtures/index.js"))
            .unwrap();
        sandbox.start().unwrap();
        assert_eq!(sandbox.name().unwrap(), sandbox.context().unwrap().name);
    }

    #[tokio::test]
    async fn script_sandbox_completes_the_handshake() {
        let host = test_host();
        host.register(TargetRegistration::with_guest(
            "fixtures/app.js",
            vec!["assertions".into()],
            Arc::new(EchoGuest),
        ));

        let (sandbox, host_end) = connect(&host, "fixtures/app.js").await;
        assert_eq!(sandbox.state(), LifecycleState::Connected);

        // Steady state: the guest talks over the transferred port.
        let answer = timeout(SHORT, host_end.recv()).await.unwrap();
        assert_eq!(answer, Some(json!("ok")));
    }

    #[tokio::test]
    async fn relative_script_target_resolves_to_itself_in_context() {
        let host = test_host();
        host.register(TargetRegistration::with_guest(
            "fixtures/app.js",
            vec!["assertions".into()],
            Arc::new(BaseReportingGuest),
        ));

        let (sandbox, host_end) = connect(&host, "fixtures/app.js").await;
        let reported = timeout(SHORT, host_end.recv()).await.unwrap().unwrap();
        let base = Url::parse(reported.as_str().unwrap()).unwrap();

        // The target URL prepended to the script list must come back
        // out of the context's loader as the URL the creator resolved,
        // not with its directory applied twice.
        let loader = ScriptLoader::new(
            base,
            Url::parse("https://cdn.example/bootstrap.html").unwrap(),
        );
        let executed = loader
            .load(&[sandbox.url().to_string()], &NullFetcher)
            .await
            .unwrap();
        assert_eq!(executed, vec![sandbox.resolved_url().clone()]);
    }

    #[tokio::test]
    async fn content_sandbox_completes_the_handshake() {
        let host = test_host();
        host.register(TargetRegistration::with_guest(
            "https://other.example/card.html",
            vec!["assertions".into()],
            Arc::new(EchoGuest),
        ));

        let sandbox = host
            .create_sandbox(SandboxSpec::content("https://other.example/card.html"))
            .unwrap();
        sandbox.start().unwrap();
        sandbox.wait_loaded().await.unwrap();

        let (host_end, guest_end) = MessagePort::pair();
        sandbox
            .connect_ports(vec![CapabilityPort::new("assertions", guest_end)])
            .unwrap();
        sandbox.wait_connected().await.unwrap();

        let answer = timeout(SHORT, host_end.recv()).await.unwrap();
        assert_eq!(answer, Some(json!("ok")));
    }

    #[tokio::test]
    async fn spoofed_loaded_signal_is_ignored() {
        let host = test_host();
        // Unregistered content target: a page with no bootstrap never
        // signals on its own.
        let sandbox = host
            .create_sandbox(SandboxSpec::content("https://other.example/silent.html"))
            .unwrap();
        sandbox.start().unwrap();

        // Right constant, wrong claimed source.
        host.bus().emit(
            ContextId::fresh(),
            SignalBody::Handshake(host.frame_adapter().messages.loaded.clone()),
        );

        assert!(timeout(SHORT, sandbox.wait_loaded()).await.is_err());
        assert_eq!(sandbox.state(), LifecycleState::Initializing);
    }

    #[tokio::test]
    async fn signals_after_terminate_resolve_nothing() {
        let host = test_host();
        let sandbox = host
            .create_sandbox(SandboxSpec::content("https://other.example/silent.html"))
            .unwrap();
        sandbox.start().unwrap();
        let id = sandbox.context().unwrap().id;
        sandbox.terminate();

        // Correct source, correct constants; both arrive into the void.
        let messages = host.frame_adapter().messages.clone();
        host.bus()
            .emit(id, SignalBody::Handshake(messages.loaded.clone()));
        host.bus()
            .emit(id, SignalBody::Handshake(messages.connected.clone()));
        tokio::task::yield_now().await;

        assert!(matches!(
            sandbox.wait_loaded().await,
            Err(SandboxError::Terminated)
        ));
        assert_eq!(sandbox.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn connect_ports_after_terminate_transmits_nothing() {
        let host = test_host();
        host.register(TargetRegistration::with_guest(
            "fixtures/app.js",
            vec!["assertions".into()],
            Arc::new(EchoGuest),
        ));
        let sandbox = host
            .create_sandbox(SandboxSpec::script("fixtures/app.js"))
            .unwrap();
        sandbox.start().unwrap();
        sandbox.wait_loaded().await.unwrap();
        sandbox.terminate();

        let (host_end, guest_end) = MessagePort::pair();
        sandbox
            .connect_ports(vec![CapabilityPort::new("assertions", guest_end)])
            .unwrap();

        // The far endpoint was dropped untransmitted.
        assert_eq!(host_end.recv().await, None);
        assert_eq!(host.frame_adapter().frame_count(), 0);
    }

    #[tokio::test]
    async fn second_connected_signal_is_ignored() {
        let host = test_host();
        host.register(TargetRegistration::with_guest(
            "fixtures/app.js",
            vec!["assertions".into()],
            Arc::new(EchoGuest),
        ));

        let scheduled = Arc::new(AtomicUsize::new(0));
        let counter = scheduled.clone();
        host.set_event_callback(Arc::new(move |continuation| {
            counter.fetch_add(1, Ordering::SeqCst);
            continuation();
        }));

        let (sandbox, _host_end) = connect(&host, "fixtures/app.js").await;
        let settled = scheduled.load(Ordering::SeqCst);

        // A replayed "capabilities connected" from the real source: the
        // one-shot listener is gone and the registry entry collected.
        let id = sandbox.context().unwrap().id;
        host.bus().emit(
            id,
            SignalBody::Handshake(host.frame_adapter().messages.connected.clone()),
        );
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(scheduled.load(Ordering::SeqCst), settled);
        assert_eq!(sandbox.state(), LifecycleState::Connected);
    }

    #[tokio::test]
    async fn guest_exception_reaches_on_error() {
        let host = test_host();
        host.register(TargetRegistration::with_guest(
            "fixtures/error.js",
            vec![],
            Arc::new(BoomGuest),
        ));

        let sandbox = host
            .create_sandbox(SandboxSpec::script("fixtures/error.js"))
            .unwrap();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel::<String>();
        sandbox.set_on_error(move |description| {
            let _ = error_tx.send(description);
        });

        sandbox.start().unwrap();
        sandbox.wait_loaded().await.unwrap();
        sandbox.connect_ports(vec![]).unwrap();
        sandbox.wait_connected().await.unwrap();

        let description = timeout(SHORT, error_rx.recv()).await.unwrap();
        assert_eq!(description.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn cross_origin_dependency_aborts_and_reports() {
        let host = test_host();
        host.register(TargetRegistration::with_guest(
            "https://cdn.example/fixtures/app.js",
            vec!["assertions".into()],
            Arc::new(EchoGuest),
        ));

        // The bootstrap document lives on cdn.example; an absolute
        // dependency from elsewhere must be rejected.
        let mut spec = SandboxSpec::script("https://cdn.example/fixtures/app.js");
        spec.dependencies = vec!["https://evil.example/b.js".into()];
        let sandbox = host.create_sandbox(spec).unwrap();

        let (error_tx, mut error_rx) = mpsc::unbounded_channel::<String>();
        sandbox.set_on_error(move |description| {
            let _ = error_tx.send(description);
        });

        sandbox.start().unwrap();
        sandbox.wait_loaded().await.unwrap();

        let (host_end, guest_end) = MessagePort::pair();
        sandbox
            .connect_ports(vec![CapabilityPort::new("assertions", guest_end)])
            .unwrap();

        let description = timeout(SHORT, error_rx.recv()).await.unwrap().unwrap();
        assert!(description.contains("https://evil.example/b.js"));

        // Loading aborted: the handshake never completes and the guest
        // never runs.
        assert!(timeout(SHORT, sandbox.wait_connected()).await.is_err());
        drop(sandbox);
        assert_eq!(host_end.recv().await, None);
    }

    #[tokio::test]
    async fn same_origin_target_is_rejected_on_legacy_backends() {
        let host = legacy_host();
        let sandbox = host
            .create_sandbox(SandboxSpec::content("https://host.example/page.html"))
            .unwrap();
        let err = sandbox.start().unwrap_err();
        assert!(matches!(err, SandboxError::Security(_)));
        // Nothing was created.
        assert_eq!(host.frame_adapter().frame_count(), 0);
        assert_eq!(host.registry().pending_count(), 0);
    }

    #[tokio::test]
    async fn relative_targets_count_as_same_origin() {
        let host = legacy_host();
        let sandbox = host
            .create_sandbox(SandboxSpec::content("fixtures/page.html"))
            .unwrap();
        assert!(matches!(
            sandbox.start(),
            Err(SandboxError::Security(_))
        ));
    }

    #[tokio::test]
    async fn cross_origin_target_passes_on_legacy_backends() {
        let host = legacy_host();
        let sandbox = host
            .create_sandbox(SandboxSpec::content("https://other.example/page.html"))
            .unwrap();
        sandbox.start().unwrap();
        assert_eq!(host.frame_adapter().frame_count(), 1);
    }

    #[tokio::test]
    async fn same_origin_request_forces_the_check_on_modern_backends() {
        let host = test_host();
        host.set_allow_same_origin(true);
        let sandbox = host
            .create_sandbox(SandboxSpec::content("https://host.example/page.html"))
            .unwrap();
        assert!(matches!(
            sandbox.start(),
            Err(SandboxError::Security(_))
        ));
    }

    #[tokio::test]
    async fn worker_kind_fails_fast() {
        let host = test_host();
        let mut spec = SandboxSpec::script("fixtures/app.js");
        spec.kind = SandboxKind::Worker;
        let sandbox = host.create_sandbox(spec).unwrap();
        assert!(matches!(
            sandbox.start(),
            Err(SandboxError::Unsupported(_))
        ));
        assert_eq!(host.frame_adapter().frame_count(), 0);
    }

    #[tokio::test]
    async fn isolation_flags_follow_configuration() {
        let host = test_host();
        let sandbox = host
            .create_sandbox(SandboxSpec::script("fixtures/app.js"))
            .unwrap();
        sandbox.start().unwrap();
        let id = sandbox.context().unwrap().id;
        assert_eq!(
            host.frame_adapter().isolation_flags(id).unwrap(),
            vec!["allow-scripts"]
        );

        let permissive = test_host();
        permissive.set_allow_same_origin(true);
        let sandbox = permissive
            // Cross-origin target, so the forced check passes.
            .create_sandbox(SandboxSpec::content("https://other.example/page.html"))
            .unwrap();
        sandbox.start().unwrap();
        let id = sandbox.context().unwrap().id;
        assert_eq!(
            permissive.frame_adapter().isolation_flags(id).unwrap(),
            vec!["allow-scripts", "allow-same-origin"]
        );
    }

    #[test]
    fn base_of_strips_the_document() {
        let url = Url::parse("https://host.example/fixtures/app.js").unwrap();
        assert_eq!(base_of(&url).as_str(), "https://host.example/fixtures/");
        let root = Url::parse("https://host.example/").unwrap();
        assert_eq!(base_of(&root).as_str(), "https://host.example/");
    }
}

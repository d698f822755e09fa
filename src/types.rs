use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ── Sandbox identity ────────────────────────────────────────────────

pub type SandboxId = String;

/// Identity of one isolation context.
///
/// Every signal emitted from inside a context carries the emitting
/// context's id as its claimed source; listeners accept a signal only
/// when that claim matches the context they are scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The sandbox's view of its isolation context: identity plus the
/// assigned debug name. The actual backend resource is owned by the
/// adapter on the sandbox's behalf.
#[derive(Debug, Clone)]
pub struct ContextBinding {
    pub id: ContextId,
    pub name: String,
}

/// Process-unique context name: the raw target URL with a fresh UUID
/// appended. The UUID defeats back/forward-cache collisions between
/// repeated sandboxes of the same target and makes logs attributable.
pub fn context_name(target_url: &str, id: ContextId) -> String {
    format!("{}?uuid={}", target_url, id.uuid())
}

// ── Sandbox kind ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxKind {
    /// Guest code loaded through the shared bootstrap document.
    Script,
    /// A complete guest document loaded directly; it carries its own
    /// bootstrap (or never completes the handshake).
    Content,
    /// Reserved for an in-process worker backend; no adapter implements
    /// it yet and initialization fails fast with `Unsupported`.
    Worker,
}

// ── Lifecycle state ─────────────────────────────────────────────────

/// `Terminated` is reachable from every non-terminal state; a terminated
/// sandbox is never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initializing,
    Loaded,
    Connected,
    Terminated,
}

// ── Sandbox spec (input to create_sandbox) ──────────────────────────

#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Target URL, absolute or relative to the host origin. Kept verbatim
    /// for context naming; resolved against the host origin for security
    /// checks and script resolution.
    pub url: String,
    pub kind: SandboxKind,
    /// Capabilities to request when the target URL has no registration.
    pub capabilities: Vec<String>,
    /// Additional dependency script URLs handed to the context at
    /// connect time, loaded in order after the target itself.
    pub dependencies: Vec<String>,
}

impl SandboxSpec {
    pub fn script(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: SandboxKind::Script,
            capabilities: vec![],
            dependencies: vec![],
        }
    }

    pub fn content(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: SandboxKind::Content,
            capabilities: vec![],
            dependencies: vec![],
        }
    }
}

// ── Handshake wire format ───────────────────────────────────────────

/// The two opaque lifecycle signal payloads. Suffixed with a session
/// UUID so concurrently live hosts on one bus cannot confuse each
/// other's handshakes.
#[derive(Debug, Clone)]
pub struct HandshakeMessages {
    pub loaded: String,
    pub connected: String,
}

impl HandshakeMessages {
    pub fn for_session(session: Uuid) -> Self {
        Self {
            loaded: format!("sandbox-bootstrap-loaded:{session}"),
            connected: format!("sandbox-capabilities-connected:{session}"),
        }
    }
}

/// Initialization message sent host → context together with the
/// transferred channel endpoints, one endpoint per capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationMessage {
    pub is_initialization: bool,
    pub capabilities: Vec<String>,
    pub base: Url,
    pub script_urls: Vec<String>,
}

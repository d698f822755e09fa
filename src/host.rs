//! The host environment: shared configuration, the target directory,
//! and the sandbox factory.
//!
//! One `Host` owns one signal bus, one connection registry, and one
//! frame adapter; every sandbox it creates shares them. Registrations
//! tie a target URL to the capabilities its sandboxes receive and,
//! optionally, to the guest program that runs inside the context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use url::Url;

use crate::adapter::IsolationAdapter;
use crate::backends::frame::{FrameAdapter, FrameAdapterConfig};
use crate::bus::SignalBus;
use crate::config::{Configuration, EventCallback, SharedConfiguration};
use crate::error::SandboxError;
use crate::guest::Guest;
use crate::registry::ConnectionRegistry;
use crate::sandbox::Sandbox;
use crate::types::SandboxSpec;

// ── Target directory ────────────────────────────────────────────────

/// A registered sandbox target: the capabilities granted to sandboxes
/// of this URL, and optionally the guest program behind it.
pub struct TargetRegistration {
    pub url: String,
    pub capabilities: Vec<String>,
    pub guest: Option<Arc<dyn Guest>>,
}

impl TargetRegistration {
    pub fn new(url: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            url: url.into(),
            capabilities,
            guest: None,
        }
    }

    pub fn with_guest(
        url: impl Into<String>,
        capabilities: Vec<String>,
        guest: Arc<dyn Guest>,
    ) -> Self {
        Self {
            url: url.into(),
            capabilities,
            guest: Some(guest),
        }
    }
}

struct Target {
    capabilities: Vec<String>,
    guest: Option<Arc<dyn Guest>>,
}

/// Registrations keyed by raw target URL. Shared with the frame
/// backend, which looks guests up when a context bootstraps.
#[derive(Default)]
pub struct TargetDirectory {
    targets: Mutex<HashMap<String, Target>>,
}

impl TargetDirectory {
    fn insert(&self, registration: TargetRegistration) {
        self.targets.lock().unwrap().insert(
            registration.url,
            Target {
                capabilities: registration.capabilities,
                guest: registration.guest,
            },
        );
    }

    pub fn is_registered(&self, url: &str) -> bool {
        self.targets.lock().unwrap().contains_key(url)
    }

    pub fn capabilities_for(&self, url: &str) -> Option<Vec<String>> {
        self.targets
            .lock()
            .unwrap()
            .get(url)
            .map(|t| t.capabilities.clone())
    }

    pub fn guest_for(&self, url: &str) -> Option<Arc<dyn Guest>> {
        self.targets
            .lock()
            .unwrap()
            .get(url)
            .and_then(|t| t.guest.clone())
    }
}

// ── Host ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Origin the host itself runs under; relative target URLs resolve
    /// against it and the cross-origin safety check compares to it.
    pub host_origin: Url,
    /// The shared bootstrap document script-kind sandboxes load.
    pub bootstrap_url: Url,
    pub frame: FrameAdapterConfig,
}

impl HostConfig {
    pub fn new(host_origin: Url, bootstrap_url: Url) -> Self {
        Self {
            host_origin,
            bootstrap_url,
            frame: FrameAdapterConfig::default(),
        }
    }
}

pub struct Host {
    config: SharedConfiguration,
    registry: Arc<ConnectionRegistry>,
    bus: SignalBus,
    targets: Arc<TargetDirectory>,
    adapter: Arc<FrameAdapter>,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        let shared = Configuration::new(config.host_origin, config.bootstrap_url).into_shared();
        let registry = Arc::new(ConnectionRegistry::default());
        let bus = SignalBus::new();
        let targets = Arc::new(TargetDirectory::default());
        let adapter = Arc::new(FrameAdapter::new(
            shared.clone(),
            registry.clone(),
            bus.clone(),
            targets.clone(),
            config.frame,
        ));
        Self {
            config: shared,
            registry,
            bus,
            targets,
            adapter,
        }
    }

    /// Register a target URL. Sandboxes created for it afterwards get
    /// the registered capabilities; re-registering replaces the entry.
    pub fn register(&self, registration: TargetRegistration) {
        tracing::info!(
            url = %registration.url,
            capabilities = ?registration.capabilities,
            "registering sandbox target"
        );
        self.targets.insert(registration);
    }

    /// Create a sandbox for `spec`. The sandbox is inert until `start`.
    pub fn create_sandbox(&self, spec: SandboxSpec) -> Result<Arc<Sandbox>, SandboxError> {
        let resolved = self
            .config
            .read()
            .unwrap()
            .host_origin
            .join(&spec.url)?;
        let capabilities = self
            .targets
            .capabilities_for(&spec.url)
            .unwrap_or(spec.capabilities);
        Ok(Sandbox::new(
            spec.kind,
            spec.url,
            resolved,
            capabilities,
            spec.dependencies,
            self.adapter.clone() as Arc<dyn IsolationAdapter>,
            self.config.clone(),
        ))
    }

    /// Ask for same-origin-capable contexts. Backends that cannot keep
    /// same-origin content isolated then refuse same-origin targets
    /// outright at start.
    pub fn set_allow_same_origin(&self, allow: bool) {
        self.config.write().unwrap().allow_same_origin = allow;
    }

    /// Replace the callback lifecycle transitions are scheduled through.
    /// The default runs them inline; embedders with their own event
    /// loop substitute their scheduler.
    pub fn set_event_callback(&self, callback: EventCallback) {
        self.config.write().unwrap().event_callback = callback;
    }

    #[cfg(test)]
    pub(crate) fn bus(&self) -> &SignalBus {
        &self.bus
    }

    #[cfg(test)]
    pub(crate) fn frame_adapter(&self) -> &Arc<FrameAdapter> {
        &self.adapter
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

use std::sync::{Arc, RwLock};

use url::Url;

/// Schedules a host-side continuation. Lifecycle listeners hand promise
/// settlement through this callback so that signal delivery and promise
/// resolution ordering stay decoupled from each other.
pub type EventCallback = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

/// Host-wide configuration. One instance per host session; mutated only
/// through the explicit `Host` setters.
#[derive(Clone)]
pub struct Configuration {
    /// Permit guest contexts to keep access to their own origin's
    /// resources. Forces the cross-origin safety check (see the frame
    /// backend) onto every context creation.
    pub allow_same_origin: bool,
    /// Origin of the page hosting the sandboxes.
    pub host_origin: Url,
    /// Where the shared bootstrap document is served from. Script-kind
    /// sandboxes are redirected here before their own code loads.
    pub bootstrap_url: Url,
    pub event_callback: EventCallback,
}

pub type SharedConfiguration = Arc<RwLock<Configuration>>;

impl Configuration {
    pub fn new(host_origin: Url, bootstrap_url: Url) -> Self {
        Self {
            allow_same_origin: false,
            host_origin,
            bootstrap_url,
            // Default: run continuations inline at the point of delivery.
            event_callback: Arc::new(|continuation| continuation()),
        }
    }

    pub fn into_shared(self) -> SharedConfiguration {
        Arc::new(RwLock::new(self))
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("allow_same_origin", &self.allow_same_origin)
            .field("host_origin", &self.host_origin.as_str())
            .field("bootstrap_url", &self.bootstrap_url.as_str())
            .finish_non_exhaustive()
    }
}

//! Lifecycle and handshake protocol for isolated, untrusted guest
//! content.
//!
//! A [`Host`] creates [`Sandbox`]es around untrusted targets. Each
//! sandbox drives one isolation context through a fixed lifecycle
//! (`created → initializing → loaded → connected`, with `terminated`
//! reachable from any non-terminal state) and a two-phase handshake:
//! the context announces its bootstrap has loaded, the host transfers
//! one channel endpoint per granted capability, and the context
//! announces the capabilities are connected. After that, host and guest
//! talk over the ports directly and this crate steps out of the way.
//!
//! Signals crossing the isolation boundary are authenticated by context
//! identity, never by payload alone: a signal claiming the wrong source
//! is ignored. Isolation mechanics live behind the [`IsolationAdapter`]
//! trait; the built-in frame backend runs each context as an in-process
//! task.
//!
//! ```no_run
//! use oubliette::{CapabilityPort, Host, HostConfig, MessagePort, SandboxSpec};
//! use url::Url;
//!
//! # async fn demo() -> Result<(), oubliette::SandboxError> {
//! let host = Host::new(HostConfig::new(
//!     Url::parse("https://host.example/").unwrap(),
//!     Url::parse("https://cdn.example/bootstrap.html").unwrap(),
//! ));
//!
//! let sandbox = host.create_sandbox(SandboxSpec::script("fixtures/app.js"))?;
//! sandbox.start()?;
//! sandbox.wait_loaded().await?;
//!
//! let (ours, theirs) = MessagePort::pair();
//! sandbox.connect_ports(vec![CapabilityPort::new("assertions", theirs)])?;
//! sandbox.wait_connected().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backends;
pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod guest;
pub mod host;
pub mod loader;
pub mod registry;
pub mod sandbox;
pub mod types;

pub use adapter::{InitializedContext, IsolationAdapter};
pub use channel::{CapabilityPort, MessagePort};
pub use config::{Configuration, EventCallback};
pub use error::SandboxError;
pub use guest::{Guest, GuestContext};
pub use host::{Host, HostConfig, TargetDirectory, TargetRegistration};
pub use sandbox::Sandbox;
pub use types::{LifecycleState, SandboxKind, SandboxSpec};

/// Errors from sandbox lifecycle operations.
///
/// Fatal configuration and security errors are returned synchronously from
/// `Sandbox::start` and abort creation entirely. Errors raised by guest code
/// inside an isolation context are never surfaced through this type; they
/// arrive as data on the signal channel and reach the sandbox's `on_error`
/// handler instead.
#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("unsupported sandbox kind: {0}")]
    Unsupported(&'static str),

    #[error("security violation: {0}")]
    Security(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("sandbox already started")]
    AlreadyStarted,

    #[error("sandbox not started")]
    NotStarted,

    #[error("sandbox terminated")]
    Terminated,

    #[error("backend error: {0}")]
    Backend(String),
}

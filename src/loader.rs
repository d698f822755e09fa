//! Dependency script loading, executed inside the isolation context.
//!
//! The base URL declaration is recorded before any script resolves, so
//! relative script URLs resolve against the base rather than against
//! the context's own document. Absolute script URLs must share the
//! context's own origin; the first mismatch aborts the whole load and
//! is reported to the creator as a context exception.

use async_trait::async_trait;
use url::Url;

use crate::error::SandboxError;

/// Fetches and executes one script. The loader drives it strictly in
/// sequence: a script finishes before the next begins, whatever the
/// fetch concurrency underneath.
#[async_trait]
pub trait ScriptFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<(), SandboxError>;
}

/// Fetcher for contexts whose scripts have no real bytes behind them
/// (registered in-process targets). Resolution and origin checks still
/// apply; execution is a no-op.
pub struct NullFetcher;

#[async_trait]
impl ScriptFetcher for NullFetcher {
    async fn fetch(&self, _url: &Url) -> Result<(), SandboxError> {
        Ok(())
    }
}

/// A rejected script load. Carries the offending URL and the
/// description handed to the host's `on_error`.
#[derive(Debug, Clone)]
pub struct ScriptViolation {
    pub url: String,
    pub description: String,
}

pub struct ScriptLoader {
    base: Url,
    document_url: Url,
}

impl ScriptLoader {
    pub fn new(base: Url, document_url: Url) -> Self {
        Self { base, document_url }
    }

    /// Load `scripts` in order. Returns the resolved URLs actually
    /// executed; stops at the first violation without attempting the
    /// remaining scripts.
    pub async fn load(
        &self,
        scripts: &[String],
        fetcher: &dyn ScriptFetcher,
    ) -> Result<Vec<Url>, ScriptViolation> {
        let own_origin = self.document_url.origin();
        let mut executed = Vec::with_capacity(scripts.len());

        for script in scripts {
            let resolved = match Url::parse(script) {
                // Absolute URL: the context may only load resources
                // from its own origin.
                Ok(url) => {
                    if url.origin() != own_origin {
                        return Err(ScriptViolation {
                            url: script.clone(),
                            description: format!(
                                "cannot load a resource ({}) from an origin other than {}",
                                script,
                                own_origin.ascii_serialization()
                            ),
                        });
                    }
                    url
                }
                Err(url::ParseError::RelativeUrlWithoutBase) => {
                    match self.base.join(script) {
                        Ok(url) => url,
                        Err(e) => {
                            return Err(ScriptViolation {
                                url: script.clone(),
                                description: format!("cannot resolve script {script}: {e}"),
                            });
                        }
                    }
                }
                Err(e) => {
                    return Err(ScriptViolation {
                        url: script.clone(),
                        description: format!("cannot resolve script {script}: {e}"),
                    });
                }
            };

            tracing::debug!(url = %resolved, "loading dependency script");
            if let Err(e) = fetcher.fetch(&resolved).await {
                return Err(ScriptViolation {
                    url: script.clone(),
                    description: format!("failed to load script {resolved}: {e}"),
                });
            }
            executed.push(resolved);
        }

        Ok(executed)
    }
}

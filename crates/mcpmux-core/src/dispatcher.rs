use crate::error::MuxError;
use crate::registry::BackendRegistry;
use rmcp::model::{CallToolResult, JsonObject, Tool};
use std::sync::Arc;
use tracing::{debug, warn};

/// Split a tool identifier into `(backend, local name)` on the first `:`.
/// Returns `None` for bare identifiers.
pub fn split_identifier(identifier: &str) -> Option<(&str, &str)> {
    identifier.split_once(':')
}

/// Rewrite a tool's identifier to the namespaced `backend:tool` form.
fn prefixed(backend: &str, mut tool: Tool) -> Tool {
    tool.name = format!("{backend}:{}", tool.name).into();
    tool
}

/// Outcome of probing one backend with a bare tool name. Probing is driven by
/// these values, not by unwinding: each backend's answer is recorded and the
/// first success short-circuits.
struct ProbeFailure {
    backend: String,
    error: MuxError,
}

/// The routing algorithm: resolves a tool identifier to one backend session
/// (prefixed form) or to the first backend that accepts it (bare form), and
/// aggregates tool listings under the namespacing convention.
///
/// Constructed once with the registry injected and held for the endpoint's
/// lifetime; each dispatch is independent and carries no state across calls.
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Route one tool call.
    ///
    /// `backend:tool` goes to exactly that backend with the prefix stripped;
    /// an unknown prefix fails with [`MuxError::BackendNotFound`] without
    /// touching any backend. A bare name is offered to each backend in
    /// registration order until one accepts it.
    pub async fn call_tool(
        &self,
        identifier: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, MuxError> {
        match split_identifier(identifier) {
            Some((backend, tool)) => {
                let session = self
                    .registry
                    .get(backend)
                    .await
                    .ok_or_else(|| MuxError::BackendNotFound(backend.to_string()))?;
                session.call_tool(tool, arguments).await
            }
            None => self.call_bare(identifier, arguments).await,
        }
    }

    async fn call_bare(
        &self,
        tool: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, MuxError> {
        let sessions = self.registry.sessions().await;
        let mut failures: Vec<ProbeFailure> = Vec::with_capacity(sessions.len());

        for (name, session) in sessions {
            match session.call_tool(tool, arguments.clone()).await {
                Ok(result) => {
                    debug!(backend = %name, %tool, "bare tool call resolved");
                    return Ok(result);
                }
                Err(error) => failures.push(ProbeFailure {
                    backend: name,
                    error,
                }),
            }
        }

        for failure in &failures {
            debug!(
                backend = %failure.backend,
                error = %failure.error,
                %tool,
                "backend declined bare tool call"
            );
        }
        Err(MuxError::ToolNotFound(tool.to_string()))
    }

    /// List tools from one backend, or from all of them.
    ///
    /// Identifiers come back rewritten to the `backend:tool` form. In the
    /// aggregate case a failing backend is skipped with a warning and the
    /// rest of the listing still succeeds.
    pub async fn list_tools(&self, backend: Option<&str>) -> Result<Vec<Tool>, MuxError> {
        match backend {
            Some(name) => {
                let session = self
                    .registry
                    .get(name)
                    .await
                    .ok_or_else(|| MuxError::BackendNotFound(name.to_string()))?;
                let tools = session.list_tools().await?;
                Ok(tools.into_iter().map(|tool| prefixed(name, tool)).collect())
            }
            None => {
                let mut aggregated = Vec::new();
                for (name, session) in self.registry.sessions().await {
                    match session.list_tools().await {
                        Ok(tools) => {
                            aggregated.extend(tools.into_iter().map(|tool| prefixed(&name, tool)));
                        }
                        Err(error) => {
                            warn!(backend = %name, %error, "skipping backend in tool aggregation");
                        }
                    }
                }
                Ok(aggregated)
            }
        }
    }
}

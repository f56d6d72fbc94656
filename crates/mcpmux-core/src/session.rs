use crate::config::{BackendConfig, RetryConfig};
use crate::error::MuxError;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ClientCapabilities, ClientInfo, Implementation,
    InitializeRequestParam, JsonObject, ProtocolVersion, ServerInfo, Tool,
};
use rmcp::service::{RunningService, ServiceError};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

type ClientService = RunningService<RoleClient, InitializeRequestParam>;

/// Request/response surface of one connected backend.
///
/// The registry and dispatcher operate on this trait rather than on
/// [`BackendSession`] directly, which keeps the routing logic independent of
/// the subprocess transport (and testable with scripted backends).
#[async_trait]
pub trait BackendConnection: Send + Sync {
    /// Logical backend name; also the routing prefix.
    fn name(&self) -> &str;

    /// One tools/list round trip.
    async fn list_tools(&self) -> Result<Vec<Tool>, MuxError>;

    /// One tools/call round trip. `tool` is the backend-local name, with any
    /// routing prefix already stripped.
    async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, MuxError>;

    /// Tear down the channel and the subprocess. Idempotent.
    async fn close(&self) -> Result<(), MuxError>;

    async fn is_closed(&self) -> bool;
}

/// One live backend: a spawned subprocess whose stdin/stdout carry an MCP
/// client session.
///
/// The session owns its channel exclusively. Round trips are serialized by
/// holding the inner lock for the full request/response exchange, so two
/// callers can never interleave requests on one channel; calls against
/// different sessions proceed concurrently. A closed session holds `None`.
pub struct BackendSession {
    config: BackendConfig,
    service: Mutex<Option<ClientService>>,
}

impl BackendSession {
    /// Spawn the configured command and perform the initialize handshake.
    ///
    /// The spawn+handshake attempt is retried per the config's retry policy
    /// for retryable failures; a spawn failure is permanent and returned
    /// immediately as [`MuxError::Spawn`].
    pub async fn connect(config: BackendConfig) -> Result<Self, MuxError> {
        config
            .validate()
            .map_err(|e| MuxError::Configuration(e.to_string()))?;

        let retry = Self::retry_strategy(&config.retry);
        let service = (|| Self::establish(&config))
            .retry(retry)
            .when(|e: &MuxError| e.is_retryable())
            .notify(|error, delay| {
                warn!(backend = %config.name, %error, "retrying backend connect in {delay:?}");
            })
            .await?;

        info!(backend = %config.name, command = %config.command, "backend connected");
        Ok(Self {
            service: Mutex::new(Some(service)),
            config,
        })
    }

    async fn establish(config: &BackendConfig) -> Result<ClientService, MuxError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        if let Some(dir) = &config.working_directory {
            cmd.current_dir(dir);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let transport = TokioChildProcess::new(cmd.configure(|_| {}))
            .map_err(|e| MuxError::Spawn(format!("{}: {e}", config.command)))?;

        Self::client_info()
            .serve(transport)
            .await
            .map_err(|e| MuxError::Handshake {
                name: config.name.clone(),
                reason: e.to_string(),
            })
    }

    fn client_info() -> ClientInfo {
        ClientInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
        }
    }

    fn retry_strategy(retry: &RetryConfig) -> ExponentialBuilder {
        // max_attempts counts the initial attempt, backon counts retries
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(retry.min_delay())
            .with_max_delay(retry.max_delay())
            .with_max_times(retry.max_attempts.saturating_sub(1) as usize);

        if retry.jitter {
            builder = builder.with_jitter();
        }

        builder
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The backend's initialize result, if the session is still open.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.service
            .lock()
            .await
            .as_ref()
            .and_then(|service| service.peer_info().cloned())
    }

    fn unavailable(&self, reason: impl Into<String>) -> MuxError {
        MuxError::BackendUnavailable {
            name: self.config.name.clone(),
            reason: reason.into(),
        }
    }

    fn timeout_error(&self) -> MuxError {
        MuxError::Timeout {
            name: self.config.name.clone(),
            timeout_ms: self.config.request_timeout_ms,
        }
    }
}

#[async_trait]
impl BackendConnection for BackendSession {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, MuxError> {
        let guard = self.service.lock().await;
        let service = guard.as_ref().ok_or_else(|| self.unavailable("session closed"))?;

        let outcome = tokio::time::timeout(
            self.config.request_timeout(),
            service.list_tools(Default::default()),
        )
        .await
        .map_err(|_| self.timeout_error())?;

        match outcome {
            Ok(result) => Ok(result.tools),
            Err(ServiceError::McpError(e)) => Err(MuxError::Other(anyhow::anyhow!(
                "backend '{}' rejected tools/list: {}",
                self.config.name,
                e
            ))),
            Err(other) => Err(self.unavailable(other.to_string())),
        }
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, MuxError> {
        let guard = self.service.lock().await;
        let service = guard.as_ref().ok_or_else(|| self.unavailable("session closed"))?;

        let request = CallToolRequestParam {
            name: tool.to_string().into(),
            arguments,
        };

        let outcome = tokio::time::timeout(
            self.config.request_timeout(),
            service.call_tool(request),
        )
        .await
        .map_err(|_| self.timeout_error())?;

        match outcome {
            Ok(result) => Ok(result),
            Err(ServiceError::McpError(e)) => Err(MuxError::ToolInvocation {
                backend: self.config.name.clone(),
                tool: tool.to_string(),
                message: e.message.to_string(),
            }),
            Err(other) => Err(self.unavailable(other.to_string())),
        }
    }

    async fn close(&self) -> Result<(), MuxError> {
        let service = self.service.lock().await.take();
        match service {
            Some(service) => {
                service.cancel().await.map_err(|e| {
                    MuxError::Other(anyhow::anyhow!("failed to cancel backend session: {e}"))
                })?;
                info!(backend = %self.config.name, "backend session closed");
                Ok(())
            }
            // closing an already-closed session is a no-op
            None => Ok(()),
        }
    }

    async fn is_closed(&self) -> bool {
        self.service.lock().await.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_fast(name: &str, command: &str) -> BackendConfig {
        BackendConfig::builder()
            .name(name)
            .command(command)
            .retry(RetryConfig::no_retry())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_rejects_unlaunchable_command() {
        let config = fail_fast("ghost", "/nonexistent/not-a-real-binary");
        match BackendSession::connect(config).await {
            Err(MuxError::Spawn(message)) => assert!(message.contains("not-a-real-binary")),
            Err(e) => panic!("expected spawn error, got: {e}"),
            Ok(_) => panic!("connect unexpectedly succeeded"),
        }
    }

    #[tokio::test]
    async fn test_connect_fails_handshake_when_process_exits() {
        // `true` launches fine but exits without speaking the protocol
        let config = fail_fast("mute", "true");
        match BackendSession::connect(config).await {
            Err(MuxError::Handshake { name, .. }) => assert_eq!(name, "mute"),
            Err(e) => panic!("expected handshake error, got: {e}"),
            Ok(_) => panic!("connect unexpectedly succeeded"),
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let config = fail_fast("bad:name", "true");
        match BackendSession::connect(config).await {
            Err(MuxError::Configuration(_)) => {}
            Err(e) => panic!("expected configuration error, got: {e}"),
            Ok(_) => panic!("connect unexpectedly succeeded"),
        }
    }
}

use thiserror::Error;

/// Failure taxonomy for multiplexer operations.
///
/// Every per-backend failure is converted into one of these at the session or
/// dispatcher boundary; nothing from a backend round trip is allowed to unwind
/// into the endpoint's serving loop.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("failed to spawn backend process: {0}")]
    Spawn(String),

    #[error("handshake with backend '{name}' failed: {reason}")]
    Handshake { name: String, reason: String },

    #[error("backend '{0}' is not connected")]
    BackendNotFound(String),

    #[error("a backend named '{0}' is already connected")]
    DuplicateBackend(String),

    #[error("backend '{name}' is unavailable: {reason}")]
    BackendUnavailable { name: String, reason: String },

    #[error("request to backend '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("tool '{0}' not found in any connected backend")]
    ToolNotFound(String),

    #[error("tool '{tool}' failed on backend '{backend}': {message}")]
    ToolInvocation {
        backend: String,
        tool: String,
        message: String,
    },

    #[error("invalid backend configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MuxError {
    /// Whether retrying the same operation could plausibly succeed.
    /// Drives the connect-time retry policy; round-trip failures are
    /// surfaced to the caller instead of being retried transparently.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MuxError::Handshake { .. } | MuxError::Timeout { .. }
        )
    }

    /// Whether the failure was caused by the caller's request rather than
    /// by backend or process state.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            MuxError::BackendNotFound(_)
                | MuxError::DuplicateBackend(_)
                | MuxError::ToolNotFound(_)
                | MuxError::Configuration(_)
        )
    }
}

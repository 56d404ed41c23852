//! Error types for the tool backend protocol, registry, and invoker.

use thiserror::Error;

pub type ToolHostResult<T> = Result<T, ToolHostError>;

#[derive(Debug, Error, Clone)]
pub enum ToolHostError {
    #[error("backend '{0}' crashed while a call was in flight")]
    BackendCrashed(String),

    #[error("backend '{0}' is unavailable")]
    BackendUnavailable(String),

    #[error("tool '{name}' timed out after {timeout_secs}s")]
    ToolTimeout { name: String, timeout_secs: u64 },

    #[error("invalid tool arguments: {0}")]
    ToolArgInvalid(String),

    #[error("unknown tool '{0}'")]
    ToolNotFound(String),

    #[error("backend '{0}' reported an error: {1}")]
    BackendError(String, String),

    #[error("registry is shutting down")]
    Shutdown,

    #[error("failed to spawn backend '{0}': {1}")]
    SpawnFailed(String, String),

    #[error("backend '{0}' produced no usable tool catalog: {1}")]
    ListToolsFailed(String, String),
}

impl ToolHostError {
    /// The structured error string spec §4.3 requires land in the tool
    /// message's `content`, not in an HTTP error — tool failures are
    /// in-band.
    pub fn as_tool_content(&self) -> String {
        match self {
            ToolHostError::ToolTimeout { name, timeout_secs } => {
                format!("Error: tool '{name}' timed out after {timeout_secs}s")
            }
            ToolHostError::ToolArgInvalid(detail) => {
                format!("Error: invalid tool arguments: {detail}")
            }
            other => format!("Error: {other}"),
        }
    }
}

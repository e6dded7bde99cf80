//! Error types for supervision.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("no supervised process named '{0}'")]
    NotFound(String),

    #[error("process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("supervisor {op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    /// Transport-level supervision failure. Callers are expected to log
    /// these and keep running.
    #[error("supervisor transport error: {0}")]
    Ipc(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Markers that identify a supervisor transport failure in an error
/// message (IPC sockets, pipes, task crashes in the call path).
const IPC_MARKERS: &[&str] = &["sock", "ipc", "pipe", "broken channel"];

impl SupervisorError {
    /// True when the error is a supervision-transport failure that must
    /// never terminate the controller.
    pub fn is_ipc_error(&self) -> bool {
        match self {
            SupervisorError::Ipc(_) | SupervisorError::Timeout { .. } => true,
            other => is_ipc_marker(&other.to_string()),
        }
    }
}

/// Check an arbitrary error message for supervisor-transport markers.
pub fn is_ipc_marker(message: &str) -> bool {
    let lower = message.to_lowercase();
    IPC_MARKERS.iter().any(|m| lower.contains(m))
}

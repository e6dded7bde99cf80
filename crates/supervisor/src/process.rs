//! Process specification and observed state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

/// Everything needed to launch a worker.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Stable process name (first 16 hex characters of the branch hash).
    pub name: String,
    /// Interpreter binary, e.g. `node` or `python3`.
    pub interpreter: String,
    /// Entrypoint file passed to the interpreter.
    pub entrypoint: PathBuf,
    /// Working directory for the child.
    pub cwd: PathBuf,
    /// Full environment map for the child. Built by the caller at spawn
    /// time; never logged with values.
    pub env: HashMap<String, String>,
}

/// Observed status of a named process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Child is running.
    Online,
    /// Child exited cleanly or was stopped on request.
    Stopped,
    /// Child exited with a non-zero code or was killed by a signal.
    Errored,
    /// No process with this name is known.
    Missing,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Online => "online",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Errored => "errored",
            ProcessStatus::Missing => "missing",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a supervised process.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub name: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

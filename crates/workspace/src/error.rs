//! Error types for workspace operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// The pipeline step that failed. Ordering of the sync pipeline is fixed:
/// reset, fetch, checkout, pull, install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Clone,
    Reset,
    Fetch,
    Checkout,
    Pull,
    Install,
}

impl SyncStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::Clone => "clone",
            SyncStep::Reset => "reset",
            SyncStep::Fetch => "fetch",
            SyncStep::Checkout => "checkout",
            SyncStep::Pull => "pull",
            SyncStep::Install => "install",
        }
    }
}

impl std::fmt::Display for SyncStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// A git or install step failed; carries the failing step.
    #[error("workspace {step} failed: {message}")]
    Step { step: SyncStep, message: String },

    /// Operation requires a working tree that does not exist on disk.
    #[error("no working tree for branch hash {0}")]
    MissingWorkspace(String),

    /// A step exceeded its time budget.
    #[error("workspace {step} timed out after {secs}s")]
    Timeout { step: SyncStep, secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkspaceError {
    /// The failing step, when the error is step-scoped.
    pub fn step(&self) -> Option<SyncStep> {
        match self {
            WorkspaceError::Step { step, .. } => Some(*step),
            WorkspaceError::Timeout { step, .. } => Some(*step),
            _ => None,
        }
    }
}

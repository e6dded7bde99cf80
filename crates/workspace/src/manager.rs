//! Workspace manager: clone, sync, install, entrypoint detection.

use crate::error::{Result, SyncStep, WorkspaceError};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Time budget for clone and dependency install (network + disk heavy).
const SLOW_STEP_TIMEOUT: Duration = Duration::from_secs(600);

/// Time budget for the remaining git steps.
const GIT_STEP_TIMEOUT: Duration = Duration::from_secs(120);

/// Worker entrypoint candidates, checked in order.
const ENTRYPOINT_CANDIDATES: &[(&str, &str)] = &[("agent.js", "node"), ("agent.py", "python3")];

/// A detected worker entrypoint: the file and the interpreter that runs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrypoint {
    pub path: PathBuf,
    pub interpreter: String,
}

/// Owns the directory tree at `{root}/{branch_hash}/`.
///
/// Operations on distinct branch hashes are independent; serializing
/// operations on the same hash is the caller's job.
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a branch hash (64 lowercase hex characters).
    pub fn dir(&self, branch_hash: &str) -> PathBuf {
        self.root.join(branch_hash)
    }

    /// True when a working tree exists for the branch hash.
    pub fn exists(&self, branch_hash: &str) -> bool {
        self.dir(branch_hash).join(".git").is_dir()
    }

    /// Clone the branch when the directory is absent, then install
    /// dependencies. A no-op clone when the tree already exists.
    pub async fn ensure_clone(
        &self,
        branch_hash: &str,
        repo_url: &str,
        branch_name: &str,
    ) -> Result<()> {
        let dir = self.dir(branch_hash);

        if !self.exists(branch_hash) {
            info!(
                "Cloning {} (branch {}) into {}",
                repo_url,
                branch_name,
                dir.display()
            );
            tokio::fs::create_dir_all(&self.root).await?;

            let mut cmd = git_command();
            cmd.args([
                "clone",
                repo_url,
                &dir.display().to_string(),
                "--branch",
                branch_name,
            ]);
            run_step(cmd, SyncStep::Clone, SLOW_STEP_TIMEOUT).await?;
        } else {
            debug!("Working tree {} already present", dir.display());
        }

        self.install(branch_hash).await
    }

    /// Bring an existing working tree to the remote tip of `branch_name`.
    ///
    /// Order is fixed: reset, fetch, checkout, pull, install. The hard
    /// reset discards local modifications; the working tree is never
    /// authoritative.
    pub async fn sync(&self, branch_hash: &str, branch_name: &str) -> Result<()> {
        let dir = self.dir(branch_hash);
        if !self.exists(branch_hash) {
            return Err(WorkspaceError::MissingWorkspace(branch_hash.to_string()));
        }

        info!("Syncing {} to branch {}", dir.display(), branch_name);

        let mut reset = git_in(&dir);
        reset.args(["reset", "--hard", "HEAD"]);
        run_step(reset, SyncStep::Reset, GIT_STEP_TIMEOUT).await?;

        let mut fetch = git_in(&dir);
        fetch.args(["fetch", "origin"]);
        run_step(fetch, SyncStep::Fetch, GIT_STEP_TIMEOUT).await?;

        let mut checkout = git_in(&dir);
        checkout.args(["checkout", branch_name]);
        run_step(checkout, SyncStep::Checkout, GIT_STEP_TIMEOUT).await?;

        let mut pull = git_in(&dir);
        pull.args(["pull", "--ff-only", "origin", branch_name]);
        run_step(pull, SyncStep::Pull, GIT_STEP_TIMEOUT).await?;

        self.install(branch_hash).await
    }

    /// Install dependencies when a manifest is present. Detection:
    /// `package.json` runs npm, `requirements.txt` runs pip, anything else
    /// is skipped.
    pub async fn install(&self, branch_hash: &str) -> Result<()> {
        let dir = self.dir(branch_hash);

        if dir.join("package.json").is_file() {
            debug!("Installing npm dependencies in {}", dir.display());
            let mut cmd = Command::new("npm");
            cmd.arg("install").current_dir(&dir);
            run_step(cmd, SyncStep::Install, SLOW_STEP_TIMEOUT).await?;
        } else if dir.join("requirements.txt").is_file() {
            debug!("Installing pip dependencies in {}", dir.display());
            let mut cmd = Command::new("pip3");
            cmd.args(["install", "-r", "requirements.txt"]).current_dir(&dir);
            run_step(cmd, SyncStep::Install, SLOW_STEP_TIMEOUT).await?;
        } else {
            debug!("No dependency manifest in {}, skipping install", dir.display());
        }

        Ok(())
    }

    /// Detect the worker entrypoint, returning the file and interpreter.
    pub fn entrypoint(&self, branch_hash: &str) -> Option<Entrypoint> {
        let dir = self.dir(branch_hash);
        for (file, interpreter) in ENTRYPOINT_CANDIDATES {
            let path = dir.join(file);
            if path.is_file() {
                return Some(Entrypoint {
                    path,
                    interpreter: interpreter.to_string(),
                });
            }
        }
        None
    }

    /// True iff an agreed entrypoint file exists in the working tree.
    pub fn has_entrypoint(&self, branch_hash: &str) -> bool {
        self.entrypoint(branch_hash).is_some()
    }

    /// The commit the working tree is currently on.
    pub async fn current_head(&self, branch_hash: &str) -> Result<String> {
        let dir = self.dir(branch_hash);
        if !self.exists(branch_hash) {
            return Err(WorkspaceError::MissingWorkspace(branch_hash.to_string()));
        }

        let mut cmd = git_in(&dir);
        cmd.args(["rev-parse", "HEAD"]);
        let output = run_step(cmd, SyncStep::Fetch, GIT_STEP_TIMEOUT).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// A git command with the inherited repo env scrubbed so the subprocess
/// only ever sees the workspace tree, and with interactive auth disabled.
fn git_command() -> Command {
    let mut cmd = Command::new("git");
    cmd.env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

fn git_in(dir: &Path) -> Command {
    let mut cmd = git_command();
    cmd.arg("-C").arg(dir);
    cmd
}

async fn run_step(mut cmd: Command, step: SyncStep, budget: Duration) -> Result<Output> {
    let output = match timeout(budget, cmd.output()).await {
        Ok(result) => result.map_err(|e| WorkspaceError::Step {
            step,
            message: e.to_string(),
        })?,
        Err(_) => {
            warn!("workspace {} step exceeded {:?}", step, budget);
            return Err(WorkspaceError::Timeout {
                step,
                secs: budget.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkspaceError::Step {
            step,
            message: stderr.trim().to_string(),
        });
    }

    Ok(output)
}

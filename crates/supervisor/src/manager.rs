//! The process manager behind the supervision API.

use crate::error::{Result, SupervisorError};
use crate::process::{ProcessInfo, ProcessSpec, ProcessStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Bound on list/describe/stop/delete calls.
const IPC_TIMEOUT: Duration = Duration::from_secs(5);

struct Managed {
    spec: ProcessSpec,
    pid: Option<u32>,
    status: ProcessStatus,
    started_at: DateTime<Utc>,
    shutdown: Option<oneshot::Sender<()>>,
    /// Monotonic respawn counter so a stale exit monitor never overwrites
    /// the state of a newer process with the same name.
    generation: u64,
}

/// Supervisor over named worker processes.
///
/// Cheap to clone; all clones share the same process table.
#[derive(Clone)]
pub struct Supervisor {
    procs: Arc<Mutex<HashMap<String, Managed>>>,
    log_dir: PathBuf,
}

impl Supervisor {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            procs: Arc::new(Mutex::new(HashMap::new())),
            log_dir: log_dir.into(),
        }
    }

    /// Path of the append-only log file for a process name.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", name))
    }

    /// Start a worker from its spec. Fails when a process with the same
    /// name is already online; callers replacing a worker delete it first
    /// so the fresh environment map is guaranteed to apply.
    pub async fn start(&self, spec: ProcessSpec) -> Result<ProcessInfo> {
        let this = self.clone();
        guard_unbounded("start", async move { this.start_inner(spec).await }).await
    }

    /// Stop-then-start preserving the name. `update_env` replaces the
    /// stored environment map before the respawn.
    pub async fn reload(
        &self,
        name: &str,
        update_env: Option<HashMap<String, String>>,
    ) -> Result<ProcessInfo> {
        let this = self.clone();
        let name = name.to_string();
        guard_unbounded("reload", async move {
            let mut spec = {
                let procs = this.procs.lock();
                let managed = procs
                    .get(&name)
                    .ok_or_else(|| SupervisorError::NotFound(name.clone()))?;
                managed.spec.clone()
            };
            if let Some(env) = update_env {
                spec.env = env;
            }
            this.stop_inner(&name).await?;
            this.start_inner(spec).await
        })
        .await
    }

    /// Stop a worker. A no-op when the process already exited.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let this = self.clone();
        let name = name.to_string();
        guard("stop", async move { this.stop_inner(&name).await }).await
    }

    /// Stop a worker and forget it entirely.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let this = self.clone();
        let name = name.to_string();
        guard("delete", async move {
            this.stop_inner(&name).await?;
            this.procs.lock().remove(&name);
            debug!("Deleted supervised process '{}'", name);
            Ok(())
        })
        .await
    }

    /// Snapshot one process; `None` when the name is unknown.
    pub async fn describe(&self, name: &str) -> Result<Option<ProcessInfo>> {
        let this = self.clone();
        let name = name.to_string();
        guard("describe", async move {
            Ok(this.procs.lock().get(&name).map(snapshot))
        })
        .await
    }

    /// Snapshot all known processes.
    pub async fn list(&self) -> Result<Vec<ProcessInfo>> {
        let this = self.clone();
        guard("list", async move {
            let procs = this.procs.lock();
            let mut infos: Vec<ProcessInfo> = procs.values().map(snapshot).collect();
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(infos)
        })
        .await
    }

    /// Best-effort tail of a process log file.
    pub async fn logs(&self, name: &str, max_lines: usize) -> Result<Vec<String>> {
        let path = self.log_path(name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SupervisorError::Io(e)),
        };

        let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
        let start = lines.len().saturating_sub(max_lines);
        Ok(lines[start..].to_vec())
    }

    async fn start_inner(&self, spec: ProcessSpec) -> Result<ProcessInfo> {
        {
            let procs = self.procs.lock();
            if let Some(existing) = procs.get(&spec.name) {
                // A process whose shutdown sender is gone is on its way
                // out; only a live one blocks the start.
                if existing.status == ProcessStatus::Online && existing.shutdown.is_some() {
                    return Err(SupervisorError::AlreadyRunning(spec.name.clone()));
                }
            }
        }

        tokio::fs::create_dir_all(&self.log_dir).await?;
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(&spec.name))?;
        let stderr_file = log_file.try_clone()?;

        let mut cmd = Command::new(&spec.interpreter);
        cmd.arg(&spec.entrypoint)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(false);

        let mut child = cmd
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::SpawnFailed("no pid for spawned child".to_string()))?;

        info!(
            "Started '{}' (pid {}): {} {}",
            spec.name,
            pid,
            spec.interpreter,
            spec.entrypoint.display()
        );

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let generation = {
            let mut procs = self.procs.lock();
            let generation = procs.get(&spec.name).map_or(0, |m| m.generation + 1);
            procs.insert(
                spec.name.clone(),
                Managed {
                    spec: spec.clone(),
                    pid: Some(pid),
                    status: ProcessStatus::Online,
                    started_at: Utc::now(),
                    shutdown: Some(shutdown_tx),
                    generation,
                },
            );
            generation
        };

        let procs = Arc::clone(&self.procs);
        let name = spec.name.clone();
        tokio::spawn(async move {
            let final_status = tokio::select! {
                exit = child.wait() => match exit {
                    Ok(status) if status.success() => ProcessStatus::Stopped,
                    Ok(status) => {
                        warn!("Process '{}' exited with {}", name, status);
                        ProcessStatus::Errored
                    }
                    Err(e) => {
                        warn!("Failed waiting on '{}': {}", name, e);
                        ProcessStatus::Errored
                    }
                },
                _ = &mut shutdown_rx => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    debug!("Process '{}' stopped on request", name);
                    ProcessStatus::Stopped
                }
            };

            let mut procs = procs.lock();
            if let Some(managed) = procs.get_mut(&name) {
                if managed.generation == generation {
                    managed.status = final_status;
                    managed.pid = None;
                    managed.shutdown = None;
                }
            }
        });

        Ok(ProcessInfo {
            name: spec.name,
            status: ProcessStatus::Online,
            pid: Some(pid),
            started_at: Some(Utc::now()),
        })
    }

    async fn stop_inner(&self, name: &str) -> Result<()> {
        let shutdown = {
            let mut procs = self.procs.lock();
            let managed = procs
                .get_mut(name)
                .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
            managed.shutdown.take()
        };

        match shutdown {
            Some(tx) => {
                // Receiver side kills the child and records the exit.
                let _ = tx.send(());
                // Give the monitor a moment to reap before callers respawn
                // under the same name.
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            None => debug!("Process '{}' already stopped", name),
        }

        Ok(())
    }
}

fn snapshot(managed: &Managed) -> ProcessInfo {
    ProcessInfo {
        name: managed.spec.name.clone(),
        status: managed.status,
        pid: managed.pid,
        started_at: Some(managed.started_at),
    }
}

/// Run a supervision call on its own task with a time bound. A panic in
/// the call path surfaces as a transport error instead of unwinding into
/// the caller.
async fn guard<T: Send + 'static>(
    op: &'static str,
    fut: impl Future<Output = Result<T>> + Send + 'static,
) -> Result<T> {
    match timeout(IPC_TIMEOUT, tokio::spawn(fut)).await {
        Err(_) => Err(SupervisorError::Timeout {
            op,
            secs: IPC_TIMEOUT.as_secs(),
        }),
        Ok(Err(join_error)) => Err(SupervisorError::Ipc(format!(
            "{} crashed: {}",
            op, join_error
        ))),
        Ok(Ok(result)) => result,
    }
}

/// Same panic isolation without the time bound (starting a worker may
/// legitimately take longer than an inspection call).
async fn guard_unbounded<T: Send + 'static>(
    op: &'static str,
    fut: impl Future<Output = Result<T>> + Send + 'static,
) -> Result<T> {
    match tokio::spawn(fut).await {
        Err(join_error) => Err(SupervisorError::Ipc(format!(
            "{} crashed: {}",
            op, join_error
        ))),
        Ok(result) => result,
    }
}

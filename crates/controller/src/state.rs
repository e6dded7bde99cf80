//! Shared application state.

use crate::branch_lock::BranchLocks;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crypto::SecretCipher;
use db::Database;
use registry::{client_from, RegistryClient};
use std::sync::Arc;
use std::time::Instant;
use supervisor::Supervisor;
use workspace::WorkspaceManager;

/// Everything the handlers need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub cipher: Option<Arc<SecretCipher>>,
    pub workspaces: Arc<WorkspaceManager>,
    pub supervisor: Supervisor,
    pub branch_locks: BranchLocks,
    pub config: Arc<ControllerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub async fn new(config: ControllerConfig) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database_url).await?);

        let cipher = match &config.master_key {
            Some(master_key) => Some(Arc::new(SecretCipher::new(master_key)?)),
            None => None,
        };

        let workspaces = Arc::new(WorkspaceManager::new(&config.workspace_root));
        let supervisor = Supervisor::new(&config.worker_log_dir);

        Ok(Self {
            db,
            cipher,
            workspaces,
            supervisor,
            branch_locks: BranchLocks::new(),
            config: Arc::new(config),
            started_at: Instant::now(),
        })
    }

    /// Chain client, built lazily per use. Fails with an unavailability
    /// error when the controller booted without chain configuration.
    pub fn registry(&self) -> registry::Result<RegistryClient> {
        client_from(self.config.registry.as_ref())
    }

    /// The secret cipher, or a configuration error when `MASTER_KEY` was
    /// not provided.
    pub fn cipher(&self) -> Result<&SecretCipher> {
        self.cipher
            .as_deref()
            .ok_or_else(|| ControllerError::Config("MASTER_KEY is not configured".to_string()))
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

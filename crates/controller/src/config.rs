//! Controller configuration.

use registry::RegistryConfig;
use std::path::PathBuf;
use tracing::warn;

/// A (repository, branch) pair the controller recovers on startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapEntry {
    pub repo_url: String,
    pub branch_name: String,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub port: u16,
    pub database_url: String,
    pub workspace_root: PathBuf,
    pub worker_log_dir: PathBuf,

    /// Advertised to workers as the metrics ingestion endpoint.
    pub backend_url: String,

    /// Master key for the secret cipher. The controller boots without it;
    /// the secrets API and env building then fail until it is provided.
    pub master_key: Option<String>,

    /// Chain access. `None` keeps the HTTP surface alive while every
    /// chain-dependent operation reports unavailability.
    pub registry: Option<RegistryConfig>,

    /// Known (repo, branch) pairs recovered on startup.
    pub bootstrap: Vec<BootstrapEntry>,

    /// Secret keys a fully configured agent is expected to carry.
    pub required_secrets: Vec<String>,
}

impl ControllerConfig {
    /// Assemble from environment variables plus the CLI-provided basics.
    pub fn from_env(
        port: u16,
        database_url: String,
        workspace_root: String,
        worker_log_dir: String,
    ) -> Self {
        let master_key = std::env::var("MASTER_KEY").ok().filter(|v| !v.is_empty());
        if master_key.is_none() {
            warn!("MASTER_KEY is not set; the secrets API will be unavailable");
        }

        let registry = RegistryConfig::from_env();
        if registry.is_none() {
            warn!("RPC_URL / REGISTRY_ADDRESS not set; chain operations will be unavailable");
        }

        let backend_url = std::env::var("BACKEND_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        Self {
            port,
            database_url,
            workspace_root: PathBuf::from(workspace_root),
            worker_log_dir: PathBuf::from(worker_log_dir),
            backend_url,
            master_key,
            registry,
            bootstrap: parse_bootstrap(
                &std::env::var("BOOTSTRAP_AGENTS").unwrap_or_default(),
            ),
            required_secrets: parse_list(&std::env::var("REQUIRED_SECRETS").unwrap_or_default()),
        }
    }

    /// RPC URL advertised to workers, empty when chain access is not
    /// configured.
    pub fn rpc_url(&self) -> String {
        self.registry
            .as_ref()
            .map(|r| r.rpc_url.clone())
            .unwrap_or_default()
    }
}

/// Parse `BOOTSTRAP_AGENTS`: comma-separated `repo_url#branch` entries.
/// The branch is everything after the *last* `#`; clone URLs carry no
/// fragments, so the split is unambiguous.
pub fn parse_bootstrap(raw: &str) -> Vec<BootstrapEntry> {
    raw.split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (repo_url, branch_name) = entry.rsplit_once('#')?;
            if repo_url.is_empty() || branch_name.is_empty() {
                warn!("Skipping malformed bootstrap entry '{}'", entry);
                return None;
            }
            Some(BootstrapEntry {
                repo_url: repo_url.to_string(),
                branch_name: branch_name.to_string(),
            })
        })
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

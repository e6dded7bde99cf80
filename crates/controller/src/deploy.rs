//! The deployment pipeline.
//!
//! A push is a sequence of idempotent steps toward one terminal state:
//! contract registered, agent row consistent, working tree at the remote
//! tip, exactly one supervised worker running with the freshest
//! environment. Each step that already holds is a no-op, so replaying a
//! push (or racing a concurrent one) converges instead of diverging.

use crate::environment::Environment;
use crate::error::{ControllerError, Result};
use crate::state::AppState;
use db::entity::agents;
use db::AgentStatus;
use registry::{branch_hash, branch_hash_hex, parse_branch_hash, supervisor_name, B256};
use std::collections::HashMap;
use supervisor::{ProcessInfo, ProcessSpec};
use tracing::{error, info, warn};

/// What caused a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Push,
    Manual,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Trigger::Push => "push",
            Trigger::Manual => "manual",
        })
    }
}

/// Terminal state of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Worker supervised and running.
    Running { pid: Option<u32> },
    /// Everything materialized but no entrypoint file exists yet; the
    /// agent stays `deploying` and starts on a later push.
    AwaitingEntrypoint,
}

/// How the working tree is brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkspaceAction {
    /// Clone when absent, hard-reset sync to the remote tip otherwise.
    CloneOrSync,
    /// Clone only when absent; an existing tree is left as-is.
    CloneIfMissing,
}

/// Full pipeline for a push: resolve contract, reconcile the agent row,
/// materialize the workspace, inject secrets, start the worker.
///
/// Holds the per-branch critical section for the whole run. Transient
/// chain failures abort without touching durable state; any other failure
/// marks the agent row `error` with a self-describing note.
pub async fn deploy_branch(
    state: &AppState,
    repo_url: &str,
    branch_name: &str,
    trigger: Trigger,
) -> Result<DeployOutcome> {
    let hash = branch_hash(repo_url, branch_name);
    let hash_hex = branch_hash_hex(&hash);

    let _guard = state.branch_locks.acquire(&hash_hex).await;
    info!(
        "🚀 Deploying {} @ {} ({}) [{}]",
        repo_url, branch_name, hash_hex, trigger
    );

    let result = run_pipeline(state, repo_url, branch_name, &hash, &hash_hex).await;
    report_outcome(state, &hash_hex, &result).await;
    result
}

async fn run_pipeline(
    state: &AppState,
    repo_url: &str,
    branch_name: &str,
    hash: &B256,
    hash_hex: &str,
) -> Result<DeployOutcome> {
    // Resolve the on-chain contract first; a branch with no contract is
    // not deployed at all.
    let registry_client = state.registry()?;
    let contract_address = registry_client.resolve(*hash).await?;
    let contract_address = contract_address.to_string();

    let agent = state
        .db
        .upsert_agent(
            hash_hex,
            repo_url,
            branch_name,
            Some(&contract_address),
            AgentStatus::Deploying,
        )
        .await?;

    finish_deployment(state, &agent, &contract_address, WorkspaceAction::CloneOrSync).await
}

/// Restart an existing agent: supervisor start/reload with a freshly
/// built environment, cloning the workspace on demand when it is missing.
/// Uses the stored contract address; falls back to a registry lookup when
/// the row never got one.
pub async fn restart_agent(state: &AppState, agent: agents::Model) -> Result<DeployOutcome> {
    let hash = parse_branch_hash(&agent.branch_hash)
        .map_err(|e| ControllerError::Config(e.to_string()))?;
    let hash_hex = agent.branch_hash.clone();

    let _guard = state.branch_locks.acquire(&hash_hex).await;
    info!("🔄 Restarting {} ({})", agent.branch_name, hash_hex);

    let contract_address = match &agent.contract_address {
        Some(address) => address.clone(),
        None => {
            let registry_client = state.registry()?;
            match registry_client.lookup(hash).await? {
                Some(address) => address.to_string(),
                None => {
                    return Err(ControllerError::NotFound(format!(
                        "branch hash {} is not registered on-chain",
                        hash_hex
                    )))
                }
            }
        }
    };

    let result = finish_deployment(
        state,
        &agent,
        &contract_address,
        WorkspaceAction::CloneIfMissing,
    )
    .await;
    report_outcome(state, &hash_hex, &result).await;
    result
}

/// Recovery's entry into the pipeline tail: the caller has already
/// resolved the contract address and holds the branch lock.
pub(crate) async fn recovery_finish(
    state: &AppState,
    agent: &agents::Model,
    contract_address: &str,
) -> Result<DeployOutcome> {
    let result = finish_deployment(state, agent, contract_address, WorkspaceAction::CloneOrSync).await;
    report_outcome(state, &agent.branch_hash, &result).await;
    result
}

/// The shared tail of every deployment: secrets, workspace, environment,
/// supervisor, status commit. Callers hold the branch lock.
async fn finish_deployment(
    state: &AppState,
    agent: &agents::Model,
    contract_address: &str,
    action: WorkspaceAction,
) -> Result<DeployOutcome> {
    let hash_hex = &agent.branch_hash;

    // Secrets written under a prior agent id follow the branch hash to
    // the current row before anything reads them.
    state
        .db
        .adopt_secrets_by_branch_hash(hash_hex, agent.id)
        .await?;

    let exists = state.workspaces.exists(hash_hex);
    match (action, exists) {
        (_, false) => {
            state
                .workspaces
                .ensure_clone(hash_hex, &agent.repo_url, &agent.branch_name)
                .await?
        }
        (WorkspaceAction::CloneOrSync, true) => {
            state.workspaces.sync(hash_hex, &agent.branch_name).await?
        }
        (WorkspaceAction::CloneIfMissing, true) => {}
    }

    let Some(entrypoint) = state.workspaces.entrypoint(hash_hex) else {
        info!(
            "Workspace {} has no entrypoint yet; agent stays deploying",
            hash_hex
        );
        return Ok(DeployOutcome::AwaitingEntrypoint);
    };

    let environment = build_environment(
        state,
        hash_hex,
        &agent.repo_url,
        &agent.branch_name,
        contract_address,
    )
    .await?;

    let hash = parse_branch_hash(hash_hex).map_err(|e| ControllerError::Config(e.to_string()))?;
    let process = start_worker(state, &hash, entrypoint, environment).await?;

    state
        .db
        .update_agent_status(agent.id, AgentStatus::Running, process.pid, None)
        .await?;

    Ok(DeployOutcome::Running { pid: process.pid })
}

/// Gather the worker environment: the required variables plus every
/// decrypted secret for this branch hash. Logs key presence only, never
/// values.
pub async fn build_environment(
    state: &AppState,
    hash_hex: &str,
    repo_url: &str,
    branch_name: &str,
    contract_address: &str,
) -> Result<Environment> {
    let rows = state.db.list_secrets_by_branch_hash(hash_hex).await?;

    let mut secrets = HashMap::new();
    if !rows.is_empty() {
        let cipher = state.cipher()?;
        for row in &rows {
            let value = cipher.decrypt_str(&row.ciphertext)?;
            secrets.insert(row.key.clone(), value);
        }
    }

    let present: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
    let missing: Vec<&str> = state
        .config
        .required_secrets
        .iter()
        .map(String::as_str)
        .filter(|key| !present.contains(key))
        .collect();
    info!(
        "Environment for {}: {} secrets present {:?}, missing {:?}",
        hash_hex,
        present.len(),
        present,
        missing
    );

    let environment = Environment {
        agent_contract_address: contract_address.to_string(),
        repo_url: repo_url.to_string(),
        branch_name: branch_name.to_string(),
        backend_url: state.config.backend_url.clone(),
        rpc_url: state.config.rpc_url(),
        secrets,
    };
    environment.validate().map_err(ControllerError::Config)?;

    Ok(environment)
}

/// Start or replace the supervised worker for a branch hash.
///
/// An existing process is deleted before the fresh start so the new
/// environment map is guaranteed to apply; a reload with an environment
/// update is the fallback when the delete fails.
pub async fn start_worker(
    state: &AppState,
    hash: &B256,
    entrypoint: workspace::Entrypoint,
    environment: Environment,
) -> Result<ProcessInfo> {
    let name = supervisor_name(hash);
    let hash_hex = branch_hash_hex(hash);
    let env_map = environment.into_env_map();

    let existing = state.supervisor.describe(&name).await?;
    if existing.is_some() {
        match state.supervisor.delete(&name).await {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    "Could not delete '{}' ({}), falling back to reload with env update",
                    name, e
                );
                return Ok(state.supervisor.reload(&name, Some(env_map)).await?);
            }
        }
    }

    let spec = ProcessSpec {
        name: name.clone(),
        interpreter: entrypoint.interpreter,
        entrypoint: entrypoint.path,
        cwd: state.workspaces.dir(&hash_hex),
        env: env_map,
    };

    Ok(state.supervisor.start(spec).await?)
}

async fn report_outcome(state: &AppState, hash_hex: &str, result: &Result<DeployOutcome>) {
    match result {
        Ok(DeployOutcome::Running { pid }) => {
            info!("✅ Worker for {} is running (pid {:?})", hash_hex, pid);
        }
        Ok(DeployOutcome::AwaitingEntrypoint) => {}
        Err(e) if e.is_transient_chain() => {
            // Not an application failure: leave no durable trace so the
            // next push retries cleanly.
            warn!(
                "⏳ Chain unavailable for {}: {}; state untouched, next push retries",
                hash_hex, e
            );
        }
        Err(e) => {
            error!("❌ Deployment of {} failed: {}", hash_hex, e);
            if e.is_supervisor_ipc() {
                warn!("Supervisor transport failure swallowed; controller stays up");
            }
            if let Ok(Some(agent)) = state.db.get_agent_by_branch_hash(hash_hex).await {
                if let Err(update_err) = state
                    .db
                    .update_agent_status(agent.id, AgentStatus::Error, None, Some(e.to_string()))
                    .await
                {
                    error!("Could not record failure for {}: {}", hash_hex, update_err);
                }
            }
        }
    }
}

//! Startup reconciliation.
//!
//! Local disk and database are ephemeral; the on-chain registry and the
//! bootstrap list are not. On every start the controller re-derives agent
//! rows from the registry, re-keys orphaned secrets, re-materializes
//! working trees, and restarts workers whose entrypoint exists. Running
//! the scan twice is the same as running it once.

use crate::config::BootstrapEntry;
use crate::deploy::DeployOutcome;
use crate::error::Result;
use crate::state::AppState;
use db::AgentStatus;
use registry::{branch_hash, branch_hash_hex};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Default, Serialize)]
pub struct RecoverySummary {
    pub scanned: usize,
    pub started: usize,
    pub awaiting_entrypoint: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Recovery scan over the bootstrap list plus every agent row already in
/// the database, deduplicated by branch hash.
pub async fn run_recovery(state: &AppState) -> RecoverySummary {
    let mut summary = RecoverySummary::default();

    let mut entries: Vec<BootstrapEntry> = state.config.bootstrap.clone();
    match state.db.list_agents(None).await {
        Ok(agents) => {
            for agent in agents {
                let known = entries.iter().any(|e| {
                    e.repo_url == agent.repo_url && e.branch_name == agent.branch_name
                });
                if !known {
                    entries.push(BootstrapEntry {
                        repo_url: agent.repo_url,
                        branch_name: agent.branch_name,
                    });
                }
            }
        }
        Err(e) => warn!("Recovery could not list existing agents: {}", e),
    }

    info!("🔎 Recovery scan over {} (repo, branch) pairs", entries.len());

    for entry in entries {
        summary.scanned += 1;
        match recover_entry(state, &entry).await {
            Ok(Some(DeployOutcome::Running { .. })) => summary.started += 1,
            Ok(Some(DeployOutcome::AwaitingEntrypoint)) => summary.awaiting_entrypoint += 1,
            Ok(None) => summary.skipped += 1,
            Err(e) if e.is_transient_chain() => {
                warn!(
                    "Recovery for {}#{} hit transient chain failure: {}; will retry next pass",
                    entry.repo_url, entry.branch_name, e
                );
                summary.skipped += 1;
            }
            Err(e) => {
                warn!(
                    "Recovery for {}#{} failed: {}",
                    entry.repo_url, entry.branch_name, e
                );
                summary.failed += 1;
            }
        }
    }

    info!(
        "🔁 Recovery finished: {} scanned, {} started, {} awaiting entrypoint, {} skipped, {} failed",
        summary.scanned,
        summary.started,
        summary.awaiting_entrypoint,
        summary.skipped,
        summary.failed
    );
    summary
}

/// Recover one (repo, branch) pair. Never registers on-chain — recovery
/// only rebuilds local state for contracts that already exist. Returns
/// `None` when the branch is unregistered and unknown locally.
async fn recover_entry(
    state: &AppState,
    entry: &BootstrapEntry,
) -> Result<Option<DeployOutcome>> {
    let hash = branch_hash(&entry.repo_url, &entry.branch_name);
    let hash_hex = branch_hash_hex(&hash);

    let _guard = state.branch_locks.acquire(&hash_hex).await;

    let existing = state.db.get_agent_by_branch_hash(&hash_hex).await?;

    // Prefer the registry; fall back to the stored address when the
    // chain is unreachable but the row survived.
    let contract_address = match state.registry() {
        Ok(client) => match client.lookup(hash).await {
            Ok(Some(address)) => Some(address.to_string()),
            Ok(None) => None,
            Err(e) if e.is_transient() => {
                existing.as_ref().and_then(|a| a.contract_address.clone())
            }
            Err(e) => return Err(e.into()),
        },
        Err(_) => existing.as_ref().and_then(|a| a.contract_address.clone()),
    };

    let Some(contract_address) = contract_address else {
        // Unregistered: the first push will register it.
        return Ok(None);
    };

    // Keep the current status for a surviving row; a resurrected row
    // starts over as deploying.
    let status = existing
        .as_ref()
        .map(|a| AgentStatus::parse(&a.status))
        .unwrap_or(AgentStatus::Deploying);

    let agent = state
        .db
        .upsert_agent(
            &hash_hex,
            &entry.repo_url,
            &entry.branch_name,
            Some(&contract_address),
            status,
        )
        .await?;

    // A worker spawned by a previous controller process survives as an
    // orphan the in-memory supervisor knows nothing about. Reap the
    // recorded pid before starting a fresh one, or the branch ends up
    // with two workers reporting.
    if let Some(pid) = agent.worker_pid {
        let name = registry::supervisor_name(&hash);
        let known = state
            .supervisor
            .describe(&name)
            .await
            .ok()
            .flatten()
            .is_some();
        if !known {
            reap_stale_worker(pid as u32).await;
        }
    }

    crate::deploy::recovery_finish(state, &agent, &contract_address)
        .await
        .map(Some)
}

/// Best-effort termination of a leftover worker pid. The pid is advisory
/// and may have been reused, so failure is ignored.
async fn reap_stale_worker(pid: u32) {
    warn!("Reaping stale worker pid {} from a previous run", pid);
    let _ = tokio::process::Command::new("kill")
        .arg(pid.to_string())
        .output()
        .await;
}

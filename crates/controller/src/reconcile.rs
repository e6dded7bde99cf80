//! Liveness reconciliation.
//!
//! The supervisor's own view can be stale, so liveness combines two
//! signals: the supervisor status and whether a metric arrived recently.
//! Metrics win ties — a worker that reports in is alive no matter what
//! the process table claims.

use crate::state::AppState;
use db::AgentStatus;
use registry::parse_branch_hash;
use std::time::Duration;
use supervisor::ProcessStatus;
use tracing::{debug, warn};

/// Metric recency window for liveness.
pub const METRICS_WINDOW_SECS: i64 = 300;

/// Upper bound for a reconciliation pass triggered by an API request.
const RECONCILE_BUDGET: Duration = Duration::from_secs(2);

/// The authoritative status table.
///
/// An online process is running even before its first metric (a fresh
/// worker must not regress and flap). A process the supervisor lost track
/// of but which still reports metrics is running unsupervised. A missing
/// process without metrics only degrades an agent that was previously
/// running; rows still deploying stay as they are.
pub fn next_status(
    sup: ProcessStatus,
    recent_metrics: bool,
    current: AgentStatus,
) -> AgentStatus {
    match (sup, recent_metrics) {
        (ProcessStatus::Online, _) => AgentStatus::Running,
        (ProcessStatus::Stopped | ProcessStatus::Errored, true) => AgentStatus::Running,
        (ProcessStatus::Stopped | ProcessStatus::Errored, false) => AgentStatus::Error,
        (ProcessStatus::Missing, true) => AgentStatus::Running,
        (ProcessStatus::Missing, false) => {
            if current == AgentStatus::Running {
                AgentStatus::Error
            } else {
                current
            }
        }
    }
}

/// One reconciliation pass over every agent row. Status writes are
/// fire-and-forget; a failure to update one row never blocks the rest.
pub async fn reconcile_agents(state: &AppState) {
    let agents = match state.db.list_agents(None).await {
        Ok(agents) => agents,
        Err(e) => {
            warn!("Reconciler could not list agents: {}", e);
            return;
        }
    };

    for agent in agents {
        let current = AgentStatus::parse(&agent.status);

        let name = match parse_branch_hash(&agent.branch_hash) {
            Ok(hash) => registry::supervisor_name(&hash),
            Err(e) => {
                warn!("Agent {} has malformed branch hash: {}", agent.id, e);
                continue;
            }
        };

        let sup_status = match state.supervisor.describe(&name).await {
            Ok(Some(info)) => info.status,
            Ok(None) => ProcessStatus::Missing,
            Err(e) => {
                // Supervisor transport trouble is not evidence of worker
                // death; skip rather than degrade.
                warn!("Reconciler could not inspect '{}': {}", name, e);
                continue;
            }
        };

        let recent = state
            .db
            .has_recent_metrics(&agent.branch_hash, METRICS_WINDOW_SECS)
            .await
            .unwrap_or(false);

        let next = next_status(sup_status, recent, current);
        if next != current {
            debug!(
                "Reconciler: agent {} ({}) {} -> {} (sup={}, recent_metrics={})",
                agent.id, agent.branch_name, current, next, sup_status, recent
            );
            let note = match (sup_status, recent) {
                (ProcessStatus::Missing, true) => {
                    Some("worker reporting metrics without supervision".to_string())
                }
                (_, false) if next == AgentStatus::Error => {
                    Some(format!("supervisor reports {}, no recent metrics", sup_status))
                }
                _ => None,
            };
            if let Err(e) = state
                .db
                .update_agent_status(agent.id, next, agent.worker_pid.map(|p| p as u32), note)
                .await
            {
                warn!("Reconciler failed to update agent {}: {}", agent.id, e);
            }
        }
    }
}

/// Reconcile with a hard time budget so agent listings stay responsive.
pub async fn reconcile_bounded(state: &AppState) {
    if tokio::time::timeout(RECONCILE_BUDGET, reconcile_agents(state))
        .await
        .is_err()
    {
        warn!("Reconciliation pass exceeded {:?}, finishing in background", RECONCILE_BUDGET);
    }
}

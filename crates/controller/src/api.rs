//! Control-plane HTTP surface.
//!
//! All JSON: 4xx for validation problems, 404 for unknown resources, 503
//! when the chain is unreachable, 500 for everything else. No
//! authentication at this layer.

use crate::deploy::{deploy_branch, restart_agent, Trigger};
use crate::error::ControllerError;
use crate::reconcile;
use crate::recovery::run_recovery;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

// ===== Error shape =====

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        match &e {
            ControllerError::NotFound(m) => ApiError::NotFound(m.clone()),
            ControllerError::Registry(r) if r.is_transient() => {
                ApiError::Unavailable(e.to_string())
            }
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<db::StoreError> for ApiError {
    fn from(e: db::StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<registry::RegistryError> for ApiError {
    fn from(e: registry::RegistryError) -> Self {
        if e.is_transient() {
            ApiError::Unavailable(e.to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<crypto::CryptoError> for ApiError {
    fn from(e: crypto::CryptoError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ===== Health =====

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ===== Agents =====

#[derive(Debug, Deserialize)]
pub struct AgentsQuery {
    pub repo_url: Option<String>,
}

pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<AgentsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    // Listing doubles as the liveness reconciliation trigger, bounded so
    // the response stays snappy.
    reconcile::reconcile_bounded(&state).await;

    let agents = state.db.list_agents(query.repo_url.as_deref()).await?;
    Ok(Json(json!({ "count": agents.len(), "agents": agents })))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<serde_json::Value>> {
    let agent = state
        .db
        .get_agent(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("agent {}", id)))?;

    let supervisor_name = registry::parse_branch_hash(&agent.branch_hash)
        .map(|hash| registry::supervisor_name(&hash))
        .unwrap_or_default();

    Ok(Json(json!({ "agent": agent, "supervisor_name": supervisor_name })))
}

pub async fn restart_agent_by_id(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<serde_json::Value>> {
    let agent = state
        .db
        .get_agent(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("agent {}", id)))?;

    spawn_restart(state, agent);
    Ok(Json(json!({ "message": "restart initiated" })))
}

pub async fn restart_agent_by_branch(
    State(state): State<AppState>,
    Path(branch_hash): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let branch_hash = normalize_hash(&branch_hash)?;
    let agent = state
        .db
        .get_agent_by_branch_hash(&branch_hash)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("branch hash {}", branch_hash)))?;

    spawn_restart(state, agent);
    Ok(Json(json!({ "message": "restart initiated" })))
}

pub async fn restart_all(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let agents = state.db.list_agents(None).await?;
    let count = agents.len();
    for agent in agents {
        spawn_restart(state.clone(), agent);
    }
    info!("Restart initiated for {} agents", count);
    Ok(Json(json!({ "message": "restart initiated", "count": count })))
}

fn spawn_restart(state: AppState, agent: db::entity::agents::Model) {
    tokio::spawn(async move {
        if let Err(e) = restart_agent(&state, agent).await {
            warn!("Restart failed: {}", e);
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct ManualTrigger {
    pub repo_url: String,
    pub branch_name: String,
}

pub async fn manual_trigger(
    State(state): State<AppState>,
    Json(body): Json<ManualTrigger>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.repo_url.trim().is_empty() || body.branch_name.trim().is_empty() {
        return Err(ApiError::Validation(
            "repo_url and branch_name are required".to_string(),
        ));
    }

    tokio::spawn(async move {
        let _ = deploy_branch(&state, &body.repo_url, &body.branch_name, Trigger::Manual).await;
    });

    Ok(Json(json!({ "message": "deployment triggered" })))
}

pub async fn check_recovery(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let summary = run_recovery(&state).await;
    Ok(Json(json!({ "message": "recovery pass complete", "summary": summary })))
}

// ===== Secrets =====

#[derive(Deserialize)]
pub struct SecretPayload {
    pub repo_url: String,
    pub branch_name: String,
    pub key: String,
    pub value: String,
}

pub async fn put_secret(
    State(state): State<AppState>,
    Json(body): Json<SecretPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.key.trim().is_empty() {
        return Err(ApiError::Validation("key is required".to_string()));
    }
    if body.value.is_empty() {
        return Err(ApiError::Validation("value is required".to_string()));
    }

    let hash = registry::branch_hash(&body.repo_url, &body.branch_name);
    let hash_hex = registry::branch_hash_hex(&hash);

    let agent = state
        .db
        .get_agent_by_branch_hash(&hash_hex)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "no agent for {} @ {}",
                body.repo_url, body.branch_name
            ))
        })?;

    let cipher = state
        .cipher()
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    let ciphertext = cipher.encrypt_str(&body.value)?;

    state.db.put_secret(agent.id, &body.key, ciphertext).await?;
    info!("Secret '{}' stored for {}", body.key, hash_hex);

    Ok(Json(json!({ "success": true, "key": body.key })))
}

pub async fn check_secrets(
    State(state): State<AppState>,
    Path(branch_hash): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let branch_hash = normalize_hash(&branch_hash)?;

    let present: Vec<String> = state
        .db
        .list_secrets_by_branch_hash(&branch_hash)
        .await?
        .into_iter()
        .map(|s| s.key)
        .collect();

    let missing: Vec<&String> = state
        .config
        .required_secrets
        .iter()
        .filter(|key| !present.contains(key))
        .collect();

    Ok(Json(json!({
        "branch_hash": branch_hash,
        "present": present,
        "missing": missing,
        "complete": missing.is_empty(),
    })))
}

// ===== Metrics =====

#[derive(Debug, Deserialize)]
pub struct MetricPayload {
    pub repo_url: String,
    pub branch_name: String,
    pub decision: String,
    pub price: Option<f64>,
    pub trade_executed: Option<bool>,
    pub trade_tx_hash: Option<String>,
    pub trade_amount: Option<f64>,
}

pub async fn ingest_metric(
    State(state): State<AppState>,
    Json(body): Json<MetricPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.repo_url.trim().is_empty()
        || body.branch_name.trim().is_empty()
        || body.decision.trim().is_empty()
    {
        return Err(ApiError::Validation(
            "repo_url, branch_name and decision are required".to_string(),
        ));
    }

    let hash = registry::branch_hash(&body.repo_url, &body.branch_name);
    let hash_hex = registry::branch_hash_hex(&hash);

    let agent = match state.db.get_agent_by_branch_hash(&hash_hex).await? {
        Some(agent) => agent,
        None => {
            // A worker is reporting for a row this database never saw —
            // the contract is the source of truth, so self-heal from it.
            let client = state.registry().map_err(ApiError::from)?;
            match client.lookup(hash).await? {
                Some(address) => {
                    warn!(
                        "Metric for unknown branch hash {}; recreating agent row from chain",
                        hash_hex
                    );
                    state
                        .db
                        .upsert_agent(
                            &hash_hex,
                            &body.repo_url,
                            &body.branch_name,
                            Some(&address.to_string()),
                            db::AgentStatus::Deploying,
                        )
                        .await?
                }
                None => {
                    return Err(ApiError::NotFound(format!(
                        "no agent and no contract for {} @ {}",
                        body.repo_url, body.branch_name
                    )))
                }
            }
        }
    };

    let metric = state
        .db
        .insert_metric(
            agent.id,
            &body.decision,
            body.price,
            body.trade_executed.unwrap_or(false),
            body.trade_tx_hash,
            body.trade_amount,
        )
        .await?;

    Ok(Json(json!({ "success": true, "metric_id": metric.id })))
}

pub async fn get_metrics(
    State(state): State<AppState>,
    Path(branch_hash): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let branch_hash = normalize_hash(&branch_hash)?;
    let metrics = state
        .db
        .recent_metrics_by_branch_hash(&branch_hash, 100)
        .await?;
    Ok(Json(json!({ "branch_hash": branch_hash, "metrics": metrics })))
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(branch_hash): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let branch_hash = normalize_hash(&branch_hash)?;
    let stats = state
        .db
        .aggregate_metrics_by_branch_hash(&branch_hash)
        .await?;
    Ok(Json(json!({ "branch_hash": branch_hash, "stats": stats })))
}

pub async fn get_trades(
    State(state): State<AppState>,
    Path(branch_hash): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let branch_hash = normalize_hash(&branch_hash)?;
    let trades = state.db.trades_by_branch_hash(&branch_hash, 100).await?;
    Ok(Json(json!({ "branch_hash": branch_hash, "trades": trades })))
}

// ===== Logs =====

/// Synthetic log stream. Supervisor stdout may not survive the host, so
/// metrics are the ground truth, with the supervisor log tail attached
/// when it exists.
pub async fn get_logs(
    State(state): State<AppState>,
    Path(branch_hash): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let branch_hash = normalize_hash(&branch_hash)?;

    let metrics = state
        .db
        .recent_metrics_by_branch_hash(&branch_hash, 100)
        .await?;

    let mut entries: Vec<serde_json::Value> = metrics
        .iter()
        .rev()
        .map(|m| {
            let mut line = format!("decision={}", m.decision);
            if let Some(price) = m.price {
                line.push_str(&format!(" price={}", price));
            }
            if m.trade_executed {
                line.push_str(" trade=executed");
                if let Some(tx) = &m.trade_tx_hash {
                    line.push_str(&format!(" tx={}", tx));
                }
            }
            json!({
                "timestamp": m.timestamp,
                "source": "metrics",
                "line": line,
            })
        })
        .collect();

    let supervisor_tail = match registry::parse_branch_hash(&branch_hash) {
        Ok(hash) => {
            let name = registry::supervisor_name(&hash);
            match state.supervisor.logs(&name, 100).await {
                Ok(lines) => lines,
                Err(e) => {
                    warn!("Could not read supervisor logs for '{}': {}", name, e);
                    Vec::new()
                }
            }
        }
        Err(_) => Vec::new(),
    };

    for line in &supervisor_tail {
        entries.push(json!({
            "timestamp": null,
            "source": "supervisor",
            "line": line,
        }));
    }

    Ok(Json(json!({ "branch_hash": branch_hash, "entries": entries })))
}

// ===== Helpers =====

fn normalize_hash(input: &str) -> ApiResult<String> {
    registry::parse_branch_hash(input)
        .map(|hash| registry::branch_hash_hex(&hash))
        .map_err(|e| ApiError::Validation(e.to_string()))
}

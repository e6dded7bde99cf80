//! Webhook ingress.
//!
//! The provider is acknowledged immediately — deployment happens on a
//! spawned task, and its outcome is visible only through the agent row
//! and the logs. Returning 200 for everything that parses keeps the
//! provider from hammering retries at a controller that is already
//! working.

use crate::deploy::{deploy_branch, Trigger};
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct PushPayload {
    pub repository: Option<RepositoryInfo>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryInfo {
    pub clone_url: Option<String>,
}

/// Branch name from a git ref: the segment after the last `/`.
///
/// `refs/heads/feature/x` therefore deploys branch `x` — slash-separated
/// branch names collapse to their final segment. The branch hash is
/// always computed from the extracted name, never the raw ref.
pub fn branch_from_ref(git_ref: &str) -> Option<String> {
    let branch = git_ref.rsplit('/').next()?.trim();
    if branch.is_empty() {
        None
    } else {
        Some(branch.to_string())
    }
}

/// Extract `(repo_url, branch_name)` or explain what is missing.
fn extract_push(payload: &PushPayload) -> Result<(String, String), &'static str> {
    let clone_url = payload
        .repository
        .as_ref()
        .and_then(|r| r.clone_url.as_deref())
        .filter(|url| !url.trim().is_empty())
        .ok_or("payload is missing repository.clone_url")?;

    let git_ref = payload
        .git_ref
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .ok_or("payload is missing ref")?;

    let branch = branch_from_ref(git_ref).ok_or("ref has no branch segment")?;

    Ok((clone_url.to_string(), branch))
}

/// `POST /webhook/git/push` — handles a push regardless of event header.
pub async fn push_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PushPayload>,
) -> impl IntoResponse {
    handle_push(state, payload).await
}

/// `POST /webhook/git` — routes by event header. Non-push events are
/// acknowledged and dropped; `ping` gets an explicit answer.
pub async fn generic_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PushPayload>,
) -> impl IntoResponse {
    let event = headers
        .get("x-github-event")
        .or_else(|| headers.get("x-git-event"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    match event.as_str() {
        "push" => handle_push(state, payload).await.into_response(),
        "ping" => {
            debug!("Webhook ping acknowledged");
            (StatusCode::OK, Json(json!({ "message": "pong" }))).into_response()
        }
        other => {
            debug!("Ignoring webhook event '{}'", other);
            (
                StatusCode::OK,
                Json(json!({ "message": format!("event '{}' ignored", other) })),
            )
                .into_response()
        }
    }
}

async fn handle_push(state: AppState, payload: PushPayload) -> impl IntoResponse {
    let (repo_url, branch_name) = match extract_push(&payload) {
        Ok(parsed) => parsed,
        Err(reason) => {
            warn!("Rejecting webhook: {}", reason);
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": reason })));
        }
    };

    info!("📦 Push received for {} @ {}", repo_url, branch_name);

    // Acknowledge before doing the work; all further signaling is via
    // the agent row and logs.
    tokio::spawn(async move {
        let _ = deploy_branch(&state, &repo_url, &branch_name, Trigger::Push).await;
    });

    (
        StatusCode::OK,
        Json(json!({ "message": "push accepted, deployment in progress" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_from_ref() {
        assert_eq!(branch_from_ref("refs/heads/main").as_deref(), Some("main"));
        assert_eq!(
            branch_from_ref("refs/heads/feature/x").as_deref(),
            Some("x")
        );
        assert_eq!(
            branch_from_ref("refs/heads/feature/y/x").as_deref(),
            Some("x")
        );
        assert_eq!(branch_from_ref("main").as_deref(), Some("main"));
        assert_eq!(branch_from_ref("refs/heads/"), None);
        assert_eq!(branch_from_ref(""), None);
    }

    #[test]
    fn test_extract_push_requires_fields() {
        let missing_ref = PushPayload {
            repository: Some(RepositoryInfo {
                clone_url: Some("https://github.com/acme/r.git".to_string()),
            }),
            git_ref: None,
        };
        assert!(extract_push(&missing_ref).is_err());

        let missing_url = PushPayload {
            repository: None,
            git_ref: Some("refs/heads/main".to_string()),
        };
        assert!(extract_push(&missing_url).is_err());

        let ok = PushPayload {
            repository: Some(RepositoryInfo {
                clone_url: Some("https://github.com/acme/r.git".to_string()),
            }),
            git_ref: Some("refs/heads/feature/login".to_string()),
        };
        let (url, branch) = extract_push(&ok).unwrap();
        assert_eq!(url, "https://github.com/acme/r.git");
        assert_eq!(branch, "login");
    }
}

//! HTTP server assembly and startup.

use crate::api;
use crate::config::ControllerConfig;
use crate::recovery;
use crate::state::AppState;
use crate::webhook;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Build the full router over an initialized state.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Webhook ingress
        .route("/webhook/git/push", post(webhook::push_webhook))
        .route("/webhook/git", post(webhook::generic_webhook))
        // Control plane
        .route("/health", get(api::health))
        .route("/api/agents", get(api::list_agents))
        .route("/api/agents/{id}", get(api::get_agent))
        .route("/api/agents/{id}/restart", post(api::restart_agent_by_id))
        .route(
            "/api/agents/branch/{branch_hash}/restart",
            post(api::restart_agent_by_branch),
        )
        .route("/api/agents/restart-all", post(api::restart_all))
        .route("/api/agents/manual-trigger", post(api::manual_trigger))
        .route(
            "/api/agents/check-recovery",
            post(api::check_recovery).get(api::check_recovery),
        )
        .route("/api/secrets", post(api::put_secret))
        .route("/api/secrets/check/{branch_hash}", get(api::check_secrets))
        .route("/api/metrics", post(api::ingest_metric))
        .route("/api/metrics/{branch_hash}", get(api::get_metrics))
        .route("/api/stats/{branch_hash}", get(api::get_stats))
        .route("/api/trades/{branch_hash}", get(api::get_trades))
        .route("/api/logs/{branch_hash}", get(api::get_logs))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Initialize state, run startup recovery, serve until ctrl-c.
pub async fn run(config: ControllerConfig) -> anyhow::Result<()> {
    let port = config.port;
    let state = AppState::new(config).await?;

    // Disk and database may be fresh; the chain and the bootstrap list
    // are the durable truth.
    let summary = recovery::run_recovery(&state).await;
    info!(
        "Startup recovery: {} scanned, {} workers started",
        summary.scanned, summary.started
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("🌐 Controller listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Workers are independent processes by design; shutdown leaves them
/// running and only stops the control plane.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received, stopping HTTP server");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use db::AgentStatus;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    /// State with in-memory store, no chain config, no master key unless
    /// provided, and tempdir workspaces.
    async fn test_state(dirs: &TempDir, master_key: Option<&str>) -> AppState {
        let config = ControllerConfig {
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            workspace_root: dirs.path().join("workspaces"),
            worker_log_dir: dirs.path().join("logs"),
            backend_url: "http://localhost:3000".to_string(),
            master_key: master_key.map(|k| k.to_string()),
            registry: None,
            bootstrap: Vec::new(),
            required_secrets: vec!["OPENAI_API_KEY".to_string()],
        };
        AppState::new(config).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_uptime() {
        let dirs = TempDir::new().unwrap();
        let app = router(test_state(&dirs, None).await);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].is_u64());
    }

    #[tokio::test]
    async fn test_webhook_missing_ref_is_rejected() {
        let dirs = TempDir::new().unwrap();
        let state = test_state(&dirs, None).await;
        let app = router(state.clone());

        let response = app
            .oneshot(post_json(
                "/webhook/git/push",
                serde_json::json!({
                    "repository": { "clone_url": "https://github.com/acme/r.git" }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // No state change
        assert!(state.db.list_agents(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_push_acks_even_when_chain_is_down() {
        let dirs = TempDir::new().unwrap();
        let state = test_state(&dirs, None).await;
        let app = router(state.clone());

        let response = app
            .oneshot(post_json(
                "/webhook/git/push",
                serde_json::json!({
                    "repository": { "clone_url": "https://github.com/acme/r.git" },
                    "ref": "refs/heads/main"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The deployment ran (and failed on the unavailable chain)
        // without creating a row.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(state.db.list_agents(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generic_webhook_ping_and_unknown_events() {
        let dirs = TempDir::new().unwrap();
        let app = router(test_state(&dirs, None).await);

        let mut ping = post_json("/webhook/git", serde_json::json!({}));
        ping.headers_mut()
            .insert("x-github-event", "ping".parse().unwrap());
        let response = app.clone().oneshot(ping).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "pong");

        let mut star = post_json("/webhook/git", serde_json::json!({}));
        star.headers_mut()
            .insert("x-github-event", "star".parse().unwrap());
        let response = app.oneshot(star).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_secret_requires_existing_agent() {
        let dirs = TempDir::new().unwrap();
        let state = test_state(&dirs, Some("test-master-key")).await;
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/secrets",
                serde_json::json!({
                    "repo_url": "https://github.com/acme/r.git",
                    "branch_name": "main",
                    "key": "OPENAI_API_KEY",
                    "value": "sk-123"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_secret_round_trip_and_check() {
        let dirs = TempDir::new().unwrap();
        let state = test_state(&dirs, Some("test-master-key")).await;
        let app = router(state.clone());

        let hash = registry::branch_hash("https://github.com/acme/r.git", "main");
        let hash_hex = registry::branch_hash_hex(&hash);
        state
            .db
            .upsert_agent(
                &hash_hex,
                "https://github.com/acme/r.git",
                "main",
                None,
                AgentStatus::Deploying,
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/secrets",
                serde_json::json!({
                    "repo_url": "https://github.com/acme/r.git",
                    "branch_name": "main",
                    "key": "OPENAI_API_KEY",
                    "value": "sk-123"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Ciphertext stored, not the plaintext
        let stored = state
            .db
            .list_secrets_by_branch_hash(&hash_hex)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_ne!(stored[0].ciphertext, b"sk-123".to_vec());

        let response = app
            .oneshot(
                Request::get(format!("/api/secrets/check/{}", hash_hex))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["present"][0], "OPENAI_API_KEY");
        assert_eq!(json["complete"], true);
    }

    #[tokio::test]
    async fn test_secrets_api_unavailable_without_master_key() {
        let dirs = TempDir::new().unwrap();
        let state = test_state(&dirs, None).await;
        let app = router(state.clone());

        let hash = registry::branch_hash("https://github.com/acme/r.git", "main");
        let hash_hex = registry::branch_hash_hex(&hash);
        state
            .db
            .upsert_agent(
                &hash_hex,
                "https://github.com/acme/r.git",
                "main",
                None,
                AgentStatus::Deploying,
            )
            .await
            .unwrap();

        let response = app
            .oneshot(post_json(
                "/api/secrets",
                serde_json::json!({
                    "repo_url": "https://github.com/acme/r.git",
                    "branch_name": "main",
                    "key": "K",
                    "value": "v"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metric_ingestion_and_queries() {
        let dirs = TempDir::new().unwrap();
        let state = test_state(&dirs, None).await;
        let app = router(state.clone());

        let hash = registry::branch_hash("https://github.com/acme/r.git", "main");
        let hash_hex = registry::branch_hash_hex(&hash);
        state
            .db
            .upsert_agent(
                &hash_hex,
                "https://github.com/acme/r.git",
                "main",
                None,
                AgentStatus::Running,
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/metrics",
                serde_json::json!({
                    "repo_url": "https://github.com/acme/r.git",
                    "branch_name": "main",
                    "decision": "buy",
                    "price": 101.5,
                    "trade_executed": true,
                    "trade_tx_hash": "0xabc"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/stats/{}", hash_hex))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["stats"]["total_cycles"], 1);
        assert_eq!(json["stats"]["trades_executed"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/trades/{}", hash_hex))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["trades"].as_array().unwrap().len(), 1);

        let response = app
            .oneshot(
                Request::get(format!("/api/logs/{}", hash_hex))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        let entries = json["entries"].as_array().unwrap();
        assert!(entries
            .iter()
            .any(|e| e["line"].as_str().unwrap().contains("decision=buy")));
    }

    #[tokio::test]
    async fn test_metric_for_unknown_agent_without_chain_is_unavailable() {
        let dirs = TempDir::new().unwrap();
        let app = router(test_state(&dirs, None).await);

        let response = app
            .oneshot(post_json(
                "/api/metrics",
                serde_json::json!({
                    "repo_url": "https://github.com/acme/unknown.git",
                    "branch_name": "main",
                    "decision": "hold"
                }),
            ))
            .await
            .unwrap();
        // Without chain access the self-heal lookup cannot run
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_agent_listing_and_lookup() {
        let dirs = TempDir::new().unwrap();
        let state = test_state(&dirs, None).await;
        let app = router(state.clone());

        let hash = registry::branch_hash("https://github.com/acme/r.git", "main");
        let hash_hex = registry::branch_hash_hex(&hash);
        let agent = state
            .db
            .upsert_agent(
                &hash_hex,
                "https://github.com/acme/r.git",
                "main",
                None,
                AgentStatus::Deploying,
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(Request::get("/api/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/agents/{}", agent.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["supervisor_name"], hash_hex[..16].to_string());

        let response = app
            .oneshot(Request::get("/api/agents/9999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_manual_trigger_validation() {
        let dirs = TempDir::new().unwrap();
        let app = router(test_state(&dirs, None).await);

        let response = app
            .oneshot(post_json(
                "/api/agents/manual-trigger",
                serde_json::json!({ "repo_url": "", "branch_name": "main" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

//! REST API server for meetbot.
//!
//! Provides HTTP endpoints for:
//! - Bot provider webhooks
//! - Session termination, usage ticks and session reads
//! - Admin recording sync
//! - Cron-triggered reconciliation sweeps

pub mod auth;
pub mod error;
pub mod routes;

use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

use crate::billing::UsageCalculator;
use crate::lifecycle::BotStateStore;
use crate::reconcile::ReconciliationPoller;
use crate::recording::RecordingResolver;
use crate::session::SessionTerminator;
use crate::webhook::WebhookHandler;

/// Everything the handlers need, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: BotStateStore,
    pub billing: UsageCalculator,
    pub webhooks: WebhookHandler,
    pub terminator: SessionTerminator,
    pub resolver: RecordingResolver,
    pub poller: ReconciliationPoller,
    pub admin_token: Option<String>,
    pub cron_secret: Option<String>,
    pub sync_limit: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .merge(routes::webhooks::router())
        .merge(routes::sessions::router())
        .merge(routes::admin::router())
        .merge(routes::cron::router())
        .layer(ServiceBuilder::new())
        .with_state(state)
}

pub struct ApiServer {
    bind: String,
    port: u16,
    state: AppState,
}

impl ApiServer {
    pub fn new(bind: String, port: u16, state: AppState) -> Self {
        Self { bind, port, state }
    }

    pub async fn start(self, cancel: CancellationToken) -> Result<()> {
        let app = build_router(self.state);
        let addr = format!("{}:{}", self.bind, self.port);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", addr))?;

        info!("API server listening on http://{}", addr);
        info!("Endpoints:");
        info!("  GET  /                       - Service info");
        info!("  POST /webhooks/bot-provider  - Bot provider webhooks");
        info!("  GET  /sessions/:id           - Session details");
        info!("  POST /sessions/:id/end       - End a session");
        info!("  POST /sessions/:id/usage     - Record a usage minute");
        info!("  GET  /admin/sync-recordings  - Resync recent recordings");
        info!("  POST /admin/sync-recordings  - Resync named sessions");
        info!("  POST /cron/reconcile         - Run a reconciliation sweep");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "meetbot",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BillingConfig, ReconcileConfig};
    use crate::db::Database;
    use crate::lifecycle::{BotStatus, TransitionSource};
    use crate::testing::{FakeProvider, FakeSummary};
    use crate::webhook::signature::SECRET_HEADER;
    use crate::webhook::WebhookVerifier;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn state() -> AppState {
        let store = BotStateStore::new(Database::in_memory().unwrap());
        store.create_session(Some("s-1".to_string())).await.unwrap();
        store.attach_bot("s-1", "bot-1", Utc::now()).await.unwrap();

        let provider = Arc::new(FakeProvider::default());
        let summary = Arc::new(FakeSummary::default());
        let timeout = Duration::from_secs(2);
        let billing = UsageCalculator::new(store.database().clone(), BillingConfig::default());
        let resolver = RecordingResolver::new(store.clone(), provider.clone(), timeout);
        let terminator = SessionTerminator::new(
            store.clone(),
            provider.clone(),
            billing.clone(),
            summary,
            timeout,
            "/sessions/{id}/report".to_string(),
        );
        let webhooks = WebhookHandler::new(
            WebhookVerifier::new(Some("hook".to_string()), None),
            store.clone(),
            billing.clone(),
            resolver.clone(),
        );
        let poller = ReconciliationPoller::new(
            store.clone(),
            provider,
            billing.clone(),
            resolver.clone(),
            terminator.clone(),
            ReconcileConfig::default(),
            timeout,
        );

        AppState {
            store,
            billing,
            webhooks,
            terminator,
            resolver,
            poller,
            admin_token: Some("admin".to_string()),
            cron_secret: Some("cron".to_string()),
            sync_limit: 10,
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = build_router(state().await);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["service"], "meetbot");
    }

    #[tokio::test]
    async fn test_webhook_status_codes() {
        let state = state().await;
        let body = json!({
            "event_id": "evt-1",
            "data": {"bot_id": "bot-1", "status": {"code": "in_call_recording"}}
        })
        .to_string();

        let unauthed = build_router(state.clone())
            .oneshot(
                Request::post("/webhooks/bot-provider")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unauthed.status(), StatusCode::UNAUTHORIZED);

        let malformed = build_router(state.clone())
            .oneshot(
                Request::post("/webhooks/bot-provider")
                    .header(SECRET_HEADER, "hook")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        let ok = build_router(state.clone())
            .oneshot(
                Request::post("/webhooks/bot-provider")
                    .header(SECRET_HEADER, "hook")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(json_body(ok).await["status"], "processed");
        assert_eq!(state.store.get_bot("bot-1").await.unwrap().status, BotStatus::Active);
    }

    #[tokio::test]
    async fn test_end_session_returns_camel_case() {
        let state = state().await;
        let response = build_router(state)
            .oneshot(
                Request::post("/sessions/s-1/end")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["botStopped"], true);
        assert_eq!(body["summaryGenerated"], true);
        assert_eq!(body["redirectTarget"], "/sessions/s-1/report");
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let response = build_router(state().await)
            .oneshot(
                Request::post("/sessions/missing/end")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_usage_endpoint_is_idempotent() {
        let state = state().await;
        let usage = json!({"minuteTimestamp": "2026-03-02T09:15:30Z", "secondsRecorded": 60}).to_string();

        for expected_accepted in [true, false] {
            let response = build_router(state.clone())
                .oneshot(
                    Request::post("/sessions/s-1/usage")
                        .header("content-type", "application/json")
                        .body(Body::from(usage.clone()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["accepted"], expected_accepted);
            assert_eq!(body["totalMinutes"], 1);
        }

        let view = build_router(state)
            .oneshot(Request::builder().uri("/sessions/s-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(view).await["usageMinutes"], 1);
    }

    #[tokio::test]
    async fn test_admin_and_cron_require_secrets() {
        let state = state().await;

        let denied = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/admin/sync-recordings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let sync = build_router(state.clone())
            .oneshot(
                Request::post("/admin/sync-recordings")
                    .header("authorization", "Bearer admin")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"sessionIds": ["s-1"]}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(sync.status(), StatusCode::OK);
        let body = json_body(sync).await;
        assert_eq!(body["processed"], 1);
        assert_eq!(body["updated"], 0);
        assert!(body["errors"].as_array().unwrap().is_empty());

        let cron = build_router(state.clone())
            .oneshot(
                Request::post("/cron/reconcile")
                    .header("x-cron-secret", "cron")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(cron.status(), StatusCode::OK);
        let body = json_body(cron).await;
        assert_eq!(body["botsChecked"], 0);
        assert_eq!(body["orphansFixed"], 0);

        let wrong = build_router(state)
            .oneshot(
                Request::get("/cron/reconcile")
                    .header("x-cron-secret", "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_transition_then_view() {
        let state = state().await;
        state
            .store
            .apply_transition("bot-1", BotStatus::Active, TransitionSource::Webhook, Utc::now(), None)
            .await
            .unwrap();

        let response = build_router(state)
            .oneshot(Request::builder().uri("/sessions/s-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["session"]["status"], "active");
        assert_eq!(body["bot"]["status"], "active");
    }
}

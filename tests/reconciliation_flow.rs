//! End-to-end flows through the public API with an in-memory database and
//! scripted provider/summary fakes.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use meetbot::api::build_router;
use meetbot::app::Services;
use meetbot::config::Config;
use meetbot::db::recordings::RecordingRepository;
use meetbot::db::Database;
use meetbot::lifecycle::{BotStatus, SessionStatus};
use meetbot::provider::{BotProvider, BotStatusReport, ProviderRecording, StatusChange};
use meetbot::reconcile::run_scheduler;
use meetbot::summary::{SummaryContext, SummaryOutput, SummaryService};
use meetbot::webhook::signature::{sign_sha256, SIGNATURE_HEADER};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const SIGNING_SECRET: &str = "integration-signing-secret";

#[derive(Default)]
struct ScriptedProvider {
    statuses: Mutex<HashMap<String, BotStatusReport>>,
    recordings: Mutex<HashMap<String, Vec<ProviderRecording>>>,
    status_calls: AtomicUsize,
}

#[async_trait]
impl BotProvider for ScriptedProvider {
    async fn get_bot_status(&self, bot_id: &str) -> Result<BotStatusReport> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .get(bot_id)
            .cloned()
            .ok_or_else(|| anyhow!("no status scripted for {}", bot_id))
    }

    async fn stop_bot(&self, _bot_id: &str) -> Result<()> {
        Ok(())
    }

    async fn list_recordings(&self, bot_id: &str) -> Result<Vec<ProviderRecording>> {
        Ok(self
            .recordings
            .lock()
            .unwrap()
            .get(bot_id)
            .cloned()
            .unwrap_or_default())
    }
}

struct EchoSummary;

#[async_trait]
impl SummaryService for EchoSummary {
    async fn finalize(&self, session_id: &str, context: &SummaryContext) -> Result<SummaryOutput> {
        Ok(SummaryOutput {
            summary: format!("{} lasted {:?}s", session_id, context.duration_seconds),
            transcript: None,
        })
    }
}

fn change(code: &str, at: DateTime<Utc>) -> StatusChange {
    StatusChange {
        code: code.to_string(),
        sub_code: None,
        created_at: at,
    }
}

fn setup() -> (Services, Config, Arc<ScriptedProvider>) {
    let mut config = Config::default();
    config.webhook.signing_secret = Some(SIGNING_SECRET.to_string());
    config.billing.rate_per_minute = 10;
    config.reconcile.cron_secret = Some("cron".to_string());

    let provider = Arc::new(ScriptedProvider::default());
    let services = Services::build(
        &config,
        Database::in_memory().unwrap(),
        provider.clone(),
        Arc::new(EchoSummary),
    );
    (services, config, provider)
}

async fn post_webhook(services: &Services, config: &Config, body: Value) -> StatusCode {
    let body = body.to_string();
    let signature = sign_sha256(body.as_bytes(), SIGNING_SECRET).unwrap();
    build_router(services.app_state(config))
        .oneshot(
            Request::post("/webhooks/bot-provider")
                .header(SIGNATURE_HEADER, signature)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn missed_terminal_webhook_is_repaired_by_sweep() {
    let (services, config, provider) = setup();
    let started = Utc::now() - ChronoDuration::minutes(10);

    services.store.create_session(Some("s-1".to_string())).await.unwrap();
    services.store.attach_bot("s-1", "bot-1", started).await.unwrap();

    let status = post_webhook(
        &services,
        &config,
        json!({
            "event_id": "evt-1",
            "event": "bot.status_change",
            "data": {"bot_id": "bot-1", "status": {"code": "in_call_recording", "created_at": started}}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        services.store.get_session("s-1").await.unwrap().status,
        SessionStatus::Active
    );

    // The "done" webhook never arrives; the vendor knows the call ended.
    provider.statuses.lock().unwrap().insert(
        "bot-1".to_string(),
        BotStatusReport {
            status_code: "done".to_string(),
            status_changes: vec![
                change("in_call_recording", started),
                change("call_ended", started + ChronoDuration::seconds(125)),
                change("done", started + ChronoDuration::seconds(140)),
            ],
            completed_at: None,
        },
    );
    provider.recordings.lock().unwrap().insert(
        "bot-1".to_string(),
        vec![ProviderRecording {
            recording_id: "rec-1".to_string(),
            status_code: "done".to_string(),
            video_url: Some("https://cdn.example/rec-1.mp4".to_string()),
            audio_url: None,
            expires_at: Some(Utc::now() + ChronoDuration::days(7)),
            started_at: Some(started),
            completed_at: Some(started + ChronoDuration::seconds(125)),
        }],
    );

    let cron = build_router(services.app_state(&config))
        .oneshot(
            Request::post("/cron/reconcile")
                .header("authorization", "Bearer cron")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(cron.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(cron.into_body(), usize::MAX).await.unwrap();
    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["botsChecked"], 1);
    assert_eq!(report["botsUpdated"], 1);
    assert_eq!(report["orphansFixed"], 1);

    let bot = services.store.get_bot("bot-1").await.unwrap();
    assert_eq!(bot.status, BotStatus::Completed);
    let session = services.store.get_session("s-1").await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.billable_minutes, Some(3));
    assert_eq!(session.billable_amount, Some(30));

    // A late "done" webhook changes nothing and adds no recording rows.
    let late = post_webhook(
        &services,
        &config,
        json!({
            "event_id": "evt-2",
            "data": {"bot_id": "bot-1", "status": {"code": "done"}}
        }),
    )
    .await;
    assert_eq!(late, StatusCode::OK);
    let recordings = services
        .store
        .database()
        .with_conn(|conn| RecordingRepository::list_for_session(conn, "s-1"))
        .unwrap();
    assert_eq!(recordings.len(), 1);
    assert_eq!(
        services.store.get_session("s-1").await.unwrap().billable_minutes,
        Some(3)
    );

    // Ending the session now only generates the summary.
    let outcome = services.terminator.end_session("s-1").await.unwrap();
    assert!(outcome.bot_stopped);
    assert!(outcome.summary_generated);
    let session = services.store.get_session("s-1").await.unwrap();
    assert!(session.is_finalized());
    assert_eq!(session.summary.as_deref(), Some("s-1 lasted Some(125)s"));
}

#[tokio::test]
async fn replayed_webhook_is_applied_once() {
    let (services, config, _) = setup();
    services.store.create_session(Some("s-1".to_string())).await.unwrap();
    services
        .store
        .attach_bot("s-1", "bot-1", Utc::now() - ChronoDuration::minutes(3))
        .await
        .unwrap();

    let started = Utc::now() - ChronoDuration::seconds(125);
    for (event_id, code, at) in [
        ("evt-1", "in_call_recording", started),
        ("evt-2", "call_ended", started + ChronoDuration::seconds(125)),
        ("evt-2", "call_ended", started + ChronoDuration::seconds(125)),
    ] {
        let status = post_webhook(
            &services,
            &config,
            json!({
                "event_id": event_id,
                "data": {"bot_id": "bot-1", "status": {"code": code, "created_at": at}}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let session = services.store.get_session("s-1").await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.billable_minutes, Some(3));
    assert_eq!(session.billable_amount, Some(30));
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let (services, config, _) = setup();
    let body = json!({"event_id": "e", "data": {"bot_id": "b", "status": {"code": "done"}}}).to_string();

    let response = build_router(services.app_state(&config))
        .oneshot(
            Request::post("/webhooks/bot-provider")
                .header(SIGNATURE_HEADER, sign_sha256(body.as_bytes(), "wrong").unwrap())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn scheduler_sweeps_until_cancelled() {
    let (services, _, provider) = setup();
    services.store.create_session(Some("s-1".to_string())).await.unwrap();
    services
        .store
        .attach_bot("s-1", "bot-1", Utc::now() - ChronoDuration::minutes(30))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_scheduler(
        services.poller.clone(),
        Duration::from_millis(50),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    // The vendor has no answer scripted, so the bot stays stale and is asked every tick.
    assert!(provider.status_calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(
        services.store.get_bot("bot-1").await.unwrap().status,
        BotStatus::Pending
    );
}

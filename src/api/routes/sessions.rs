//! Session endpoints.
//!
//! - GET  /sessions/:id        session with bot, recordings and usage
//! - POST /sessions/:id/end    user-triggered termination
//! - POST /sessions/:id/usage  one minute of usage

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::billing::UsageAck;
use crate::session::{load_session_view, SessionView, TerminationOutcome};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRequest {
    pub minute_timestamp: DateTime<Utc>,
    pub seconds_recorded: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/end", post(end_session))
        .route("/sessions/:id/usage", post(record_usage))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let view = load_session_view(state.store.database(), &id).await?;
    Ok(Json(view))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TerminationOutcome>> {
    info!("End requested for session {}", id);
    let outcome = state.terminator.end_session(&id).await?;
    Ok(Json(outcome))
}

async fn record_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<UsageRequest>>,
) -> ApiResult<Json<UsageAck>> {
    let Json(req) = body.ok_or_else(|| ApiError::bad_request("Expected {minuteTimestamp, secondsRecorded}"))?;
    let ack = state
        .billing
        .record_usage_minute(&id, req.minute_timestamp, req.seconds_recorded)
        .await?;
    Ok(Json(ack))
}

//! Cron entry point for deployments that drive sweeps externally.

use axum::{extract::State, http::HeaderMap, response::Json, routing::get, Router};

use crate::api::auth::check_cron;
use crate::api::error::ApiResult;
use crate::api::AppState;
use crate::reconcile::SweepReport;

pub fn router() -> Router<AppState> {
    Router::new().route("/cron/reconcile", get(reconcile).post(reconcile))
}

/// GET|POST /cron/reconcile - run one sweep now.
async fn reconcile(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<SweepReport>> {
    check_cron(&headers, state.cron_secret.as_deref())?;
    let report = state.poller.run_sweep().await?;
    Ok(Json(report))
}

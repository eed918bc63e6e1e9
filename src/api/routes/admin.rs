//! Admin endpoints.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::api::auth::check_admin;
use crate::api::error::ApiResult;
use crate::api::AppState;
use crate::recording::SyncReport;

#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub session_ids: Option<Vec<String>>,
    pub limit: Option<usize>,
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/admin/sync-recordings",
        get(sync_recent).post(sync_selected),
    )
}

/// GET /admin/sync-recordings - resolve recordings for recent completed sessions.
async fn sync_recent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SyncQuery>,
) -> ApiResult<Json<SyncReport>> {
    check_admin(&headers, state.admin_token.as_deref())?;
    let limit = query.limit.unwrap_or(state.sync_limit);
    let report = state.resolver.sync_recordings(None, limit).await?;
    Ok(Json(report))
}

/// POST /admin/sync-recordings - same, optionally for named sessions.
async fn sync_selected(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<SyncRequest>>,
) -> ApiResult<Json<SyncReport>> {
    check_admin(&headers, state.admin_token.as_deref())?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let limit = req.limit.unwrap_or(state.sync_limit);
    let report = state.resolver.sync_recordings(req.session_ids, limit).await?;
    Ok(Json(report))
}

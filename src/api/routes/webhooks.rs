//! Bot provider webhook endpoint.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde_json::json;

use crate::api::error::ApiResult;
use crate::api::AppState;
use crate::webhook::WebhookResponse;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/bot-provider", post(receive_webhook))
}

/// POST /webhooks/bot-provider - 200 processed or duplicate, 400 malformed, 401 unauthenticated.
async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let response = state.webhooks.handle(&headers, &body).await?;
    let status = response.status();

    let body = match response {
        WebhookResponse::Processed(outcome) => json!({"status": "processed", "outcome": outcome}),
        WebhookResponse::Duplicate => json!({"status": "duplicate"}),
        WebhookResponse::Rejected(reason) => json!({"error": true, "message": reason}),
        WebhookResponse::Unauthorized => json!({"error": true, "message": "Unauthorized"}),
    };
    Ok((status, Json(body)).into_response())
}

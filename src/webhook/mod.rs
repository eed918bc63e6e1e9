//! Webhook Ingress.
//!
//! Provider deliveries are at-least-once and unordered. Each one is
//! authenticated, parsed, recorded by event id, and fed into the state store.
//! Redeliveries of a processed event are acknowledged without reapplying.

pub mod signature;

pub use signature::WebhookVerifier;

use anyhow::Result;
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::billing::UsageCalculator;
use crate::db::webhook_events::WebhookEventRepository;
use crate::error::engine_error;
use crate::lifecycle::{normalize_vendor_status, BotStateStore, TransitionOutcome, TransitionSource};
use crate::recording::{RecordingResolution, RecordingResolver};

/// Fallback delivery id header when the body carries none.
pub const EVENT_ID_HEADER: &str = "webhook-id";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    bot: Option<BotRef>,
    #[serde(default)]
    status: Option<EnvelopeStatus>,
    /// Newer payloads nest the status under `data.data`.
    #[serde(default)]
    data: Option<EnvelopeStatus>,
}

#[derive(Debug, Deserialize)]
struct BotRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    sub_code: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// A parsed, not yet applied, delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub event_id: String,
    pub bot_id: String,
    pub code: String,
    pub sub_code: Option<String>,
    pub observed_at: Option<DateTime<Utc>>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Extract the event id, bot id and vendor status code from a raw body.
pub fn parse_event(headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent, String> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| format!("malformed JSON body: {}", e))?;

    let header_id = headers
        .get(EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let event_id = non_empty(envelope.event_id)
        .or_else(|| non_empty(envelope.id))
        .or_else(|| non_empty(header_id))
        .ok_or("missing event_id")?;

    let data = envelope.data.ok_or("missing data")?;
    let bot_id = non_empty(data.bot_id)
        .or_else(|| non_empty(data.bot.map(|b| b.id)))
        .ok_or("missing bot_id")?;

    let status = data.status.or(data.data);
    let (code, sub_code, observed_at) = match status {
        Some(s) => (s.code, s.sub_code, s.created_at.or(s.updated_at)),
        None => (None, None, None),
    };
    let code = non_empty(code)
        .or_else(|| {
            non_empty(envelope.event).filter(|e| e.starts_with("bot.") && e != "bot.status_change")
        })
        .ok_or("missing status code")?;

    Ok(WebhookEvent {
        event_id,
        bot_id,
        code,
        sub_code,
        observed_at,
    })
}

/// How a delivery was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookResponse {
    /// Recorded as processed, with the outcome note.
    Processed(String),
    /// Already processed earlier; nothing reapplied.
    Duplicate,
    /// Malformed delivery; not recorded.
    Rejected(String),
    Unauthorized,
}

impl WebhookResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Processed(_) | Self::Duplicate => StatusCode::OK,
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Clone)]
pub struct WebhookHandler {
    verifier: WebhookVerifier,
    store: BotStateStore,
    billing: UsageCalculator,
    resolver: RecordingResolver,
}

impl WebhookHandler {
    pub fn new(
        verifier: WebhookVerifier,
        store: BotStateStore,
        billing: UsageCalculator,
        resolver: RecordingResolver,
    ) -> Self {
        Self {
            verifier,
            store,
            billing,
            resolver,
        }
    }

    /// Process one delivery. An `Err` is an internal failure: the event stays
    /// unprocessed so the provider's redelivery retries it.
    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookResponse> {
        if let Err(e) = self.verifier.verify(headers, body) {
            warn!("Rejected webhook delivery: {}", e);
            return Ok(WebhookResponse::Unauthorized);
        }

        let event = match parse_event(headers, body) {
            Ok(event) => event,
            Err(reason) => {
                warn!("Malformed webhook delivery: {}", reason);
                return Ok(WebhookResponse::Rejected(reason));
            }
        };

        let received = {
            let event = event.clone();
            self.store
                .database()
                .call(move |conn| {
                    WebhookEventRepository::record_received(
                        conn,
                        &event.event_id,
                        &event.bot_id,
                        &event.code,
                        Utc::now(),
                    )
                })
                .await?
        };
        if received.processed {
            debug!("Webhook event {} already processed", event.event_id);
            return Ok(WebhookResponse::Duplicate);
        }

        let outcome = self.apply(&event).await?;
        self.mark_processed(&event.event_id, &outcome).await?;
        Ok(WebhookResponse::Processed(outcome))
    }

    async fn apply(&self, event: &WebhookEvent) -> Result<String> {
        let Some(proposed) = normalize_vendor_status(&event.code) else {
            info!(
                "Webhook event {} carries unknown status code {:?}; acknowledged",
                event.event_id, event.code
            );
            return Ok(format!("unknown status code {}", event.code));
        };

        let observed_at = event.observed_at.unwrap_or_else(Utc::now);
        let outcome = match self
            .store
            .apply_transition(
                &event.bot_id,
                proposed,
                TransitionSource::Webhook,
                observed_at,
                Some(&event.code),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if engine_error(&e).is_some_and(|e| e.is_not_found()) => {
                info!(
                    "Webhook event {} for unknown bot {}; acknowledged",
                    event.event_id, event.bot_id
                );
                return Ok(format!("unknown bot {}", event.bot_id));
            }
            Err(e) => return Err(e),
        };

        if outcome.entered_terminal() {
            return Ok(self.on_terminal(&outcome).await);
        }

        Ok(if outcome.applied {
            format!("applied {} -> {}", outcome.previous.as_str(), outcome.current.as_str())
        } else {
            format!("ignored {} ({})", proposed.as_str(), outcome.reason.as_str())
        })
    }

    /// Local billing now, recording lookup in the background.
    async fn on_terminal(&self, outcome: &TransitionOutcome) -> String {
        let mut note = format!(
            "applied {} -> {}",
            outcome.previous.as_str(),
            outcome.current.as_str()
        );

        match self.billing.finalize_local(&outcome.session_id).await {
            Ok(summary) => note.push_str(&format!("; billed {} min", summary.billable_minutes)),
            Err(e) => {
                warn!("Billing failed for session {}: {:#}", outcome.session_id, e);
                note.push_str("; billing failed");
            }
        }

        let resolver = self.resolver.clone();
        let bot_id = outcome.bot_id.clone();
        tokio::spawn(async move {
            match resolver.resolve_recording(&bot_id).await {
                Ok(RecordingResolution::Resolved(recordings)) => {
                    debug!("Bot {} has {} recording(s)", bot_id, recordings.len())
                }
                Ok(RecordingResolution::Pending) => {
                    debug!("Recording for bot {} not ready; sweep will retry", bot_id)
                }
                Ok(RecordingResolution::NotFound) => {
                    warn!("Bot {} vanished before recording lookup", bot_id)
                }
                Err(e) => warn!("Recording lookup for bot {} failed: {:#}", bot_id, e),
            }
        });

        note
    }

    async fn mark_processed(&self, event_id: &str, outcome: &str) -> Result<()> {
        let event_id = event_id.to_string();
        let outcome = outcome.to_string();
        self.store
            .database()
            .call(move |conn| WebhookEventRepository::mark_processed(conn, &event_id, &outcome))
            .await
    }
}

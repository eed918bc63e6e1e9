use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lifecycle::status::{BotStatus, SessionStatus};

/// A session row.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub status: SessionStatus,
    pub bot_id: Option<String>,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub recording_ended_at: Option<DateTime<Utc>>,
    pub billable_minutes: Option<i64>,
    pub billable_amount: Option<i64>,
    pub billing_source: Option<String>,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }
}

/// A bot row.
#[derive(Debug, Clone, Serialize)]
pub struct BotRecord {
    pub bot_id: String,
    pub session_id: String,
    pub status: BotStatus,
    /// Last raw vendor code seen. Informational only.
    pub vendor_status: Option<String>,
    pub last_status_change_at: DateTime<Utc>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BotRecord {
    /// The most recent moment anything confirmed this bot's state.
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        match self.last_reconciled_at {
            Some(reconciled) if reconciled > self.last_status_change_at => reconciled,
            _ => self.last_status_change_at,
        }
    }
}

/// A resolved recording artifact.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingRecord {
    pub recording_id: String,
    pub session_id: String,
    pub bot_id: String,
    pub retrieval_url: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub resolved_at: DateTime<Utc>,
}

/// An inbound webhook delivery, kept for deduplication.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub bot_id: Option<String>,
    pub reported_status: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    pub outcome: Option<String>,
}

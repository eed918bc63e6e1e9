//! Bot provider abstraction.
//!
//! The engine talks to the external bot vendor only through [`BotProvider`]. Vendor
//! payloads are turned into the plain types below at this boundary; raw status
//! codes stay strings here and are normalized by the lifecycle module.

pub mod recall_client;

pub use recall_client::RecallClient;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lifecycle::status::{is_recording_start_code, normalize_vendor_status, BotStatus};

/// One entry of the vendor's status history.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub code: String,
    pub sub_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Authoritative bot status as reported by the vendor.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatusReport {
    pub status_code: String,
    pub status_changes: Vec<StatusChange>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BotStatusReport {
    pub fn normalized_status(&self) -> Option<BotStatus> {
        normalize_vendor_status(&self.status_code)
    }

    /// When the vendor says the current status began.
    pub fn latest_change_at(&self) -> Option<DateTime<Utc>> {
        self.status_changes.iter().map(|c| c.created_at).max()
    }

    /// First moment the bot started recording, according to the vendor.
    pub fn recording_started_at(&self) -> Option<DateTime<Utc>> {
        self.status_changes
            .iter()
            .filter(|c| is_recording_start_code(&c.code))
            .map(|c| c.created_at)
            .min()
    }

    /// When the bot reached a terminal state, according to the vendor.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or_else(|| {
            self.status_changes
                .iter()
                .filter(|c| normalize_vendor_status(&c.code).is_some_and(|s| s.is_terminal()))
                .map(|c| c.created_at)
                .min()
        })
    }

    /// Vendor-clock recording window, if both ends are known.
    pub fn recording_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.recording_started_at()?, self.ended_at()?))
    }
}

/// A recording artifact listed by the vendor.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRecording {
    pub recording_id: String,
    pub status_code: String,
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProviderRecording {
    pub fn is_done(&self) -> bool {
        self.status_code.eq_ignore_ascii_case("done")
    }

    /// Mixed video first, then mixed audio.
    pub fn playable_url(&self) -> Option<&str> {
        non_blank(&self.video_url).or_else(|| non_blank(&self.audio_url))
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds().max(0)),
            _ => None,
        }
    }
}

fn non_blank(url: &Option<String>) -> Option<&str> {
    url.as_deref().filter(|u| !u.trim().is_empty())
}

#[async_trait]
pub trait BotProvider: Send + Sync {
    async fn get_bot_status(&self, bot_id: &str) -> Result<BotStatusReport>;

    /// Ask the bot to leave the call.
    async fn stop_bot(&self, bot_id: &str) -> Result<()>;

    async fn list_recordings(&self, bot_id: &str) -> Result<Vec<ProviderRecording>>;
}

//! HTTP client for a Recall-style bot API.
//!
//! Endpoints used:
//! - `GET  {base}/bot/{id}/`            status history
//! - `POST {base}/bot/{id}/leave_call/` stop
//! - `GET  {base}/recording/?bot_id=`   recording artifacts (paginated)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{BotProvider, BotStatusReport, ProviderRecording, StatusChange};
use crate::config::ProviderConfig;

/// Safety valve for the recordings cursor.
const MAX_RECORDING_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct WireStatus {
    code: String,
}

#[derive(Debug, Deserialize)]
struct WireStatusChange {
    code: String,
    #[serde(default)]
    sub_code: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WireBot {
    #[allow(dead_code)]
    id: String,
    #[serde(default)]
    status: Option<WireStatus>,
    #[serde(default)]
    status_changes: Vec<WireStatusChange>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WireRecordingPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<WireRecording>,
}

#[derive(Debug, Deserialize)]
struct WireRecording {
    id: String,
    status: WireStatus,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    media_shortcuts: WireMediaShortcuts,
}

#[derive(Debug, Default, Deserialize)]
struct WireMediaShortcuts {
    #[serde(default)]
    video_mixed: Option<WireMedia>,
    #[serde(default)]
    audio_mixed: Option<WireMedia>,
}

#[derive(Debug, Deserialize)]
struct WireMedia {
    #[serde(default)]
    data: Option<WireMediaData>,
}

#[derive(Debug, Deserialize)]
struct WireMediaData {
    #[serde(default)]
    download_url: Option<String>,
}

impl WireMedia {
    fn download_url(self) -> Option<String> {
        self.data.and_then(|d| d.download_url)
    }
}

fn into_report(bot: WireBot) -> Result<BotStatusReport> {
    let mut changes: Vec<StatusChange> = bot
        .status_changes
        .into_iter()
        .map(|c| StatusChange {
            code: c.code,
            sub_code: c.sub_code,
            created_at: c.created_at,
        })
        .collect();
    changes.sort_by_key(|c| c.created_at);

    let status_code = bot
        .status
        .map(|s| s.code)
        .or_else(|| changes.last().map(|c| c.code.clone()))
        .context("Bot response carries no status")?;

    Ok(BotStatusReport {
        status_code,
        status_changes: changes,
        completed_at: bot.completed_at,
    })
}

fn into_recording(rec: WireRecording) -> ProviderRecording {
    let WireMediaShortcuts {
        video_mixed,
        audio_mixed,
    } = rec.media_shortcuts;

    ProviderRecording {
        recording_id: rec.id,
        status_code: rec.status.code,
        video_url: video_mixed.and_then(WireMedia::download_url),
        audio_url: audio_mixed.and_then(WireMedia::download_url),
        expires_at: rec.expires_at,
        started_at: rec.started_at,
        completed_at: rec.completed_at,
    }
}

/// Client for the bot vendor REST API.
pub struct RecallClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RecallClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("meetbot/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build provider HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .context("provider.api_key is required to talk to the bot provider")?;
        Self::new(&config.base_url, api_key, config.request_timeout())
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.api_key)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to request {}", what))?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow::anyhow!("{} failed ({}): {}", what, status, body));
        }

        serde_json::from_str(&body).with_context(|| format!("Failed to parse {} response", what))
    }
}

#[async_trait]
impl BotProvider for RecallClient {
    async fn get_bot_status(&self, bot_id: &str) -> Result<BotStatusReport> {
        let url = format!("{}/bot/{}/", self.base_url, bot_id);
        let bot: WireBot = self.get_json(&url, "bot status").await?;
        into_report(bot)
    }

    async fn stop_bot(&self, bot_id: &str) -> Result<()> {
        let url = format!("{}/bot/{}/leave_call/", self.base_url, bot_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .context("Failed to request bot stop")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Bot stop failed ({}): {}", status, body));
        }

        debug!("Stop requested for bot {}", bot_id);
        Ok(())
    }

    async fn list_recordings(&self, bot_id: &str) -> Result<Vec<ProviderRecording>> {
        let mut url = format!("{}/recording/?bot_id={}", self.base_url, bot_id);
        let mut recordings = Vec::new();

        for _ in 0..MAX_RECORDING_PAGES {
            let page: WireRecordingPage = self.get_json(&url, "recording list").await?;
            recordings.extend(page.results.into_iter().map(into_recording));

            match page.next {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        Ok(recordings)
    }
}

//! Summary generation behind a narrow interface.
//!
//! The engine never summarizes anything itself. After a session completes it
//! hands a [`SummaryContext`] to a [`SummaryService`]: either an HTTP endpoint or
//! a local shell command.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::SummaryConfig;
use crate::db::{RecordingRecord, SessionRecord};

/// Environment variable names for session metadata passed to summary commands.
pub mod summary_env {
    pub const SESSION_ID: &str = "MEETBOT_SESSION_ID";
    pub const BOT_ID: &str = "MEETBOT_BOT_ID";
    pub const RECORDING_URL: &str = "MEETBOT_RECORDING_URL";
    pub const DURATION_SECONDS: &str = "MEETBOT_DURATION_SECONDS";
}

/// What a summary service gets to work with.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryContext {
    pub session_id: String,
    pub bot_id: Option<String>,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub recording_ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub recording_urls: Vec<String>,
}

impl SummaryContext {
    pub fn new(session: &SessionRecord, recordings: &[RecordingRecord]) -> Self {
        let duration_seconds = match (session.recording_started_at, session.recording_ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds().max(0)),
            _ => None,
        };
        Self {
            session_id: session.id.clone(),
            bot_id: session.bot_id.clone(),
            recording_started_at: session.recording_started_at,
            recording_ended_at: session.recording_ended_at,
            duration_seconds,
            recording_urls: recordings.iter().map(|r| r.retrieval_url.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryOutput {
    pub summary: String,
    #[serde(default)]
    pub transcript: Option<String>,
}

#[async_trait]
pub trait SummaryService: Send + Sync {
    async fn finalize(&self, session_id: &str, context: &SummaryContext) -> Result<SummaryOutput>;
}

/// Pick the summary service from config: an HTTP endpoint when set, otherwise
/// the shell command.
pub fn from_config(config: &SummaryConfig) -> Result<Arc<dyn SummaryService>> {
    match config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(endpoint) => Ok(Arc::new(HttpSummaryService::new(endpoint, config.timeout())?)),
        None => Ok(Arc::new(ShellCommandSummaryService::new(
            config.command.clone(),
            config.timeout_seconds,
        ))),
    }
}

/// POSTs the context as JSON and expects `{summary, transcript?}` back.
pub struct HttpSummaryService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSummaryService {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build summary HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SummaryService for HttpSummaryService {
    async fn finalize(&self, session_id: &str, context: &SummaryContext) -> Result<SummaryOutput> {
        info!("Requesting summary for session {} from {}", session_id, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(context)
            .send()
            .await
            .context("Failed to reach summary service")?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!("Summary service failed ({}): {}", status, body));
        }

        serde_json::from_str(&body).context("Failed to parse summary service response")
    }
}

/// Runs a shell command with the session context.
/// - Context JSON on stdin
/// - Session metadata in `MEETBOT_*` environment variables
/// - Stdout becomes the summary; non-zero exit or timeout is an error
pub struct ShellCommandSummaryService {
    command: String,
    timeout: Duration,
}

impl ShellCommandSummaryService {
    pub fn new(command: String, timeout_seconds: u64) -> Self {
        Self {
            command,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }
}

#[async_trait]
impl SummaryService for ShellCommandSummaryService {
    async fn finalize(&self, session_id: &str, context: &SummaryContext) -> Result<SummaryOutput> {
        if self.command.trim().is_empty() {
            return Err(anyhow!("No summary command configured"));
        }

        info!("Running summary command for session {}: {}", session_id, self.command);
        let payload = serde_json::to_vec(context)?;

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(summary_env::SESSION_ID, session_id)
            .env(summary_env::BOT_ID, context.bot_id.as_deref().unwrap_or(""))
            .env(
                summary_env::RECORDING_URL,
                context.recording_urls.first().map(String::as_str).unwrap_or(""),
            )
            .env(
                summary_env::DURATION_SECONDS,
                context.duration_seconds.unwrap_or(0).to_string(),
            )
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn summary command")?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            // A command that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(&payload).await {
                warn!("Summary command did not read its input: {}", e);
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow!(
                    "Summary command timed out after {}s",
                    self.timeout.as_secs()
                )
            })?
            .context("Summary command failed to execute")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Summary command exited with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        let summary = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if summary.is_empty() {
            return Err(anyhow!("Summary command produced no output"));
        }

        Ok(SummaryOutput {
            summary,
            transcript: None,
        })
    }
}

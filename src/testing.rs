//! In-crate fakes for the provider and summary seams.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::provider::{BotProvider, BotStatusReport, ProviderRecording, StatusChange};
use crate::summary::{SummaryContext, SummaryOutput, SummaryService};

pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + ChronoDuration::seconds(offset_secs)
}

/// Vendor report whose history is `changes`; the last code is the current status.
pub fn report(changes: &[(&str, DateTime<Utc>)]) -> BotStatusReport {
    BotStatusReport {
        status_code: changes.last().map(|(c, _)| c.to_string()).unwrap_or_default(),
        status_changes: changes
            .iter()
            .map(|(code, ts)| StatusChange {
                code: code.to_string(),
                sub_code: None,
                created_at: *ts,
            })
            .collect(),
        completed_at: None,
    }
}

pub fn done_recording(id: &str, url: &str) -> ProviderRecording {
    ProviderRecording {
        recording_id: id.to_string(),
        status_code: "done".to_string(),
        video_url: Some(url.to_string()),
        audio_url: None,
        expires_at: Some(Utc::now() + ChronoDuration::days(7)),
        started_at: Some(at(0)),
        completed_at: Some(at(125)),
    }
}

#[derive(Default)]
pub struct FakeProvider {
    statuses: Mutex<HashMap<String, BotStatusReport>>,
    recordings: Mutex<HashMap<String, Vec<ProviderRecording>>>,
    failing: Mutex<HashSet<String>>,
    stop_delay: Mutex<Option<Duration>>,
    status_delay: Mutex<Option<Duration>>,
    pub status_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn set_status(&self, bot_id: &str, report: BotStatusReport) {
        self.statuses.lock().unwrap().insert(bot_id.to_string(), report);
    }

    pub fn set_recordings(&self, bot_id: &str, recordings: Vec<ProviderRecording>) {
        self.recordings
            .lock()
            .unwrap()
            .insert(bot_id.to_string(), recordings);
    }

    /// Every call for `bot_id` errors.
    pub fn fail_bot(&self, bot_id: &str) {
        self.failing.lock().unwrap().insert(bot_id.to_string());
    }

    pub fn hang_stop(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = Some(delay);
    }

    pub fn slow_status(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = Some(delay);
    }

    fn check(&self, bot_id: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(bot_id) {
            return Err(anyhow!("vendor error for {}", bot_id));
        }
        Ok(())
    }
}

#[async_trait]
impl BotProvider for FakeProvider {
    async fn get_bot_status(&self, bot_id: &str) -> Result<BotStatusReport> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(bot_id)?;
        self.statuses
            .lock()
            .unwrap()
            .get(bot_id)
            .cloned()
            .ok_or_else(|| anyhow!("bot {} unknown to vendor", bot_id))
    }

    async fn stop_bot(&self, bot_id: &str) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.stop_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(bot_id)
    }

    async fn list_recordings(&self, bot_id: &str) -> Result<Vec<ProviderRecording>> {
        self.check(bot_id)?;
        Ok(self
            .recordings
            .lock()
            .unwrap()
            .get(bot_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeSummary {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeSummary {
    pub fn slow(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl SummaryService for FakeSummary {
    async fn finalize(&self, session_id: &str, context: &SummaryContext) -> Result<SummaryOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("summary backend down"));
        }
        Ok(SummaryOutput {
            summary: format!("summary of {}", session_id),
            transcript: Some(format!("{} recordings", context.recording_urls.len())),
        })
    }
}

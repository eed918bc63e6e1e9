//! Usage and billing.
//!
//! Two independent views of the same call: per-minute usage ticks recorded while
//! the bot is in the call, and a single finalization from the recording window.
//! Finalization is what gets billed; the per-minute count is only compared
//! against it for data-quality logging.

use anyhow::{anyhow, Result};
use chrono::{DateTime, DurationRound, Utc};
use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::BillingConfig;
use crate::db::sessions::SessionRepository;
use crate::db::usage::UsageRepository;
use crate::db::Database;
use crate::error::EngineError;

/// Where the billed duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingSource {
    /// Local webhook/termination timestamps.
    Local,
    /// Timestamps reported by the bot vendor. Always wins.
    Vendor,
}

impl BillingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Vendor => "vendor",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAck {
    pub accepted: bool,
    pub total_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSummary {
    pub billable_minutes: i64,
    pub amount: i64,
    pub currency: String,
    /// Source of the figures now stored on the session.
    pub source: BillingSource,
    /// False when a vendor finalization was already in place and kept.
    pub applied: bool,
}

/// Whole minutes billed for a duration: partial minutes round up, negative is zero.
pub fn billable_minutes(seconds: i64) -> i64 {
    let seconds = seconds.max(0);
    (seconds + 59) / 60
}

#[derive(Clone)]
pub struct UsageCalculator {
    db: Database,
    config: BillingConfig,
}

impl UsageCalculator {
    pub fn new(db: Database, config: BillingConfig) -> Self {
        Self { db, config }
    }

    /// Record one minute of usage. Replays of the same (session, minute) are
    /// accepted=false and leave the total unchanged.
    pub async fn record_usage_minute(
        &self,
        session_id: &str,
        minute_timestamp: DateTime<Utc>,
        seconds_recorded: i64,
    ) -> Result<UsageAck> {
        let minute = minute_timestamp
            .duration_trunc(chrono::Duration::minutes(1))
            .map_err(|e| anyhow!("Cannot truncate usage timestamp: {}", e))?;
        let seconds = seconds_recorded.clamp(0, 60);
        let session_id = session_id.to_string();

        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if SessionRepository::get(&tx, &session_id)?.is_none() {
                    return Err(EngineError::SessionNotFound(session_id).into());
                }
                let accepted = UsageRepository::insert_minute(&tx, &session_id, minute, seconds, Utc::now())?;
                let total_minutes = UsageRepository::count_minutes(&tx, &session_id)?;
                tx.commit()?;

                if !accepted {
                    debug!("Duplicate usage minute {} for session {}", minute, session_id);
                }
                Ok(UsageAck {
                    accepted,
                    total_minutes,
                })
            })
            .await
    }

    /// Compute and store the billable duration for a session.
    ///
    /// A local finalization never replaces a vendor one. Re-finalizing with the
    /// same inputs stores the same figures.
    pub async fn finalize_billing(
        &self,
        session_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        source: BillingSource,
    ) -> Result<BillingSummary> {
        let seconds = (end - start).num_seconds();
        let minutes = billable_minutes(seconds);
        let amount = minutes * self.config.rate_per_minute;
        let currency = self.config.currency.clone();
        let tolerance = self.config.tolerance_minutes;
        let session_id = session_id.to_string();

        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let session = SessionRepository::get(&tx, &session_id)?
                    .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;

                let vendor_locked = source == BillingSource::Local
                    && session.billing_source.as_deref() == Some(BillingSource::Vendor.as_str());
                if vendor_locked {
                    debug!("Session {} keeps vendor billing; local figures ignored", session_id);
                    return Ok(BillingSummary {
                        billable_minutes: session.billable_minutes.unwrap_or(0),
                        amount: session.billable_amount.unwrap_or(0),
                        currency,
                        source: BillingSource::Vendor,
                        applied: false,
                    });
                }

                SessionRepository::set_billing(&tx, &session_id, minutes, amount, source.as_str(), Utc::now())?;
                let usage_minutes = UsageRepository::count_minutes(&tx, &session_id)?;
                tx.commit()?;

                info!(
                    "Billing finalized for session {}: {}s -> {} min, {} {} ({})",
                    session_id,
                    seconds.max(0),
                    minutes,
                    amount,
                    currency,
                    source.as_str()
                );

                if usage_minutes > 0 && (usage_minutes - minutes).abs() > tolerance {
                    warn!(
                        "Usage mismatch for session {}: {} tracked minutes vs {} billed ({})",
                        session_id,
                        usage_minutes,
                        minutes,
                        source.as_str()
                    );
                }

                Ok(BillingSummary {
                    billable_minutes: minutes,
                    amount,
                    currency,
                    source,
                    applied: true,
                })
            })
            .await
    }

    /// Finalize from the session's own recording window. Sessions that never
    /// started recording bill zero minutes.
    pub async fn finalize_local(&self, session_id: &str) -> Result<BillingSummary> {
        let id = session_id.to_string();
        let session = self
            .db
            .call(move |conn| {
                SessionRepository::get(conn, &id)?.ok_or_else(|| EngineError::SessionNotFound(id).into())
            })
            .await?;

        let end = session.recording_ended_at.unwrap_or_else(Utc::now);
        let start = session.recording_started_at.unwrap_or(end);
        self.finalize_billing(session_id, start, end, BillingSource::Local)
            .await
    }
}

//! Reconciliation Poller.
//!
//! One sweep: take the sweep lease, ask the vendor about every stale bot and
//! feed the answer through the same transition function the webhook uses, then
//! retry missing recordings and summaries. Per-item failures are logged and
//! counted; they never abort the sweep.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::billing::{BillingSource, UsageCalculator};
use crate::config::ReconcileConfig;
use crate::db::leases::LeaseRepository;
use crate::db::BotRecord;
use crate::lifecycle::{BotStateStore, TransitionSource};
use crate::provider::BotProvider;
use crate::recording::RecordingResolver;
use crate::session::SessionTerminator;

pub const SWEEP_LEASE: &str = "reconcile-sweep";

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub bots_checked: usize,
    pub bots_updated: usize,
    /// Bots the vendor reports as finished but whose finish we never heard about.
    pub orphans_fixed: usize,
    pub recordings_resolved: usize,
    pub summaries_retried: usize,
    /// Another sweep held the lease; nothing was done.
    pub skipped: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct BotCheck {
    updated: bool,
    orphan_fixed: bool,
    recording_resolved: bool,
}

#[derive(Clone)]
pub struct ReconciliationPoller {
    store: BotStateStore,
    provider: Arc<dyn BotProvider>,
    billing: UsageCalculator,
    resolver: RecordingResolver,
    terminator: SessionTerminator,
    config: ReconcileConfig,
    call_timeout: Duration,
}

impl ReconciliationPoller {
    pub fn new(
        store: BotStateStore,
        provider: Arc<dyn BotProvider>,
        billing: UsageCalculator,
        resolver: RecordingResolver,
        terminator: SessionTerminator,
        config: ReconcileConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            billing,
            resolver,
            terminator,
            config,
            call_timeout,
        }
    }

    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        // One holder per run: the scheduler and the cron endpoint share this poller.
        let holder = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());
        if !self.acquire_lease(&holder, now).await? {
            info!("Reconciliation sweep already running elsewhere; skipping");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        }

        let result = self.sweep(now).await;

        let name = SWEEP_LEASE;
        if let Err(e) = self
            .store
            .database()
            .call(move |conn| LeaseRepository::release(conn, name, &holder))
            .await
        {
            warn!("Failed to release sweep lease: {:#}", e);
        }

        let report = result?;
        info!(
            "Sweep done: {} checked, {} updated, {} orphans fixed, {} recordings, {} summaries, {} errors",
            report.bots_checked,
            report.bots_updated,
            report.orphans_fixed,
            report.recordings_resolved,
            report.summaries_retried,
            report.errors.len()
        );
        Ok(report)
    }

    async fn acquire_lease(&self, holder: &str, now: DateTime<Utc>) -> Result<bool> {
        let holder = holder.to_string();
        let ttl = self.config.lease_ttl();
        self.store
            .database()
            .call(move |conn| LeaseRepository::try_acquire(conn, SWEEP_LEASE, &holder, now, ttl))
            .await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let stale = self
            .store
            .find_stale_bots(self.config.staleness(), now, self.config.batch_limit)
            .await?;
        debug!("{} stale bot(s) to reconcile", stale.len());
        self.check_stale_bots(stale, &mut report).await;

        self.retry_recordings(now, &mut report).await?;
        self.retry_summaries(now, &mut report).await?;

        Ok(report)
    }

    async fn check_stale_bots(&self, stale: Vec<BotRecord>, report: &mut SweepReport) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for bot in stale {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    report.errors.push(format!("worker pool closed: {}", e));
                    break;
                }
            };
            let poller = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = poller.check_bot(&bot).await;
                (bot.bot_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            report.bots_checked += 1;
            match joined {
                Ok((_, Ok(check))) => {
                    report.bots_updated += usize::from(check.updated);
                    report.orphans_fixed += usize::from(check.orphan_fixed);
                    report.recordings_resolved += usize::from(check.recording_resolved);
                }
                Ok((bot_id, Err(e))) => {
                    warn!("Reconciling bot {} failed; retrying next sweep: {:#}", bot_id, e);
                    report.errors.push(format!("{}: {:#}", bot_id, e));
                }
                Err(e) => {
                    warn!("Reconcile worker panicked: {}", e);
                    report.errors.push(format!("worker: {}", e));
                }
            }
        }
    }

    /// Reconcile one bot against the vendor. The bot is only marked reconciled
    /// when the vendor answered, so failures stay stale for the next sweep.
    async fn check_bot(&self, bot: &BotRecord) -> Result<BotCheck> {
        let vendor = tokio::time::timeout(self.call_timeout, self.provider.get_bot_status(&bot.bot_id))
            .await
            .map_err(|_| anyhow!("vendor status call timed out"))??;

        let mut check = BotCheck::default();
        let now = Utc::now();

        let Some(proposed) = vendor.normalized_status() else {
            warn!(
                "Vendor reports unknown status {:?} for bot {}",
                vendor.status_code, bot.bot_id
            );
            self.store.mark_reconciled(&bot.bot_id, now).await?;
            return Ok(check);
        };

        let observed_at = if proposed.is_terminal() {
            vendor.ended_at().or_else(|| vendor.latest_change_at())
        } else {
            vendor.latest_change_at()
        }
        .unwrap_or(now);
        let outcome = self
            .store
            .apply_transition(
                &bot.bot_id,
                proposed,
                TransitionSource::Poller,
                observed_at,
                Some(&vendor.status_code),
            )
            .await?;
        check.updated = outcome.applied;
        check.orphan_fixed = outcome.entered_terminal();

        if outcome.current.is_terminal() {
            match vendor.recording_window() {
                Some((start, end)) => {
                    if let Err(e) = self
                        .billing
                        .finalize_billing(&outcome.session_id, start, end, BillingSource::Vendor)
                        .await
                    {
                        warn!("Vendor billing for session {} failed: {:#}", outcome.session_id, e);
                    }
                }
                None if outcome.entered_terminal() => {
                    if let Err(e) = self.billing.finalize_local(&outcome.session_id).await {
                        warn!("Billing for session {} failed: {:#}", outcome.session_id, e);
                    }
                }
                None => {}
            }
        }

        if outcome.entered_terminal() {
            info!(
                "Orphaned bot {} repaired: {} -> {}",
                bot.bot_id,
                outcome.previous.as_str(),
                outcome.current.as_str()
            );
            match self.resolver.resolve_recording(&bot.bot_id).await {
                Ok(resolution) => check.recording_resolved = resolution.is_resolved(),
                Err(e) => warn!("Recording lookup for bot {} failed: {:#}", bot.bot_id, e),
            }
        }

        self.store.mark_reconciled(&bot.bot_id, now).await?;
        Ok(check)
    }

    async fn retry_recordings(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let since = now - self.config.recording_retry_window();
        let bots = self
            .store
            .find_bots_missing_recordings(since, self.config.batch_limit)
            .await?;

        for bot in bots {
            match self.resolver.resolve_recording(&bot.bot_id).await {
                Ok(resolution) if resolution.is_resolved() => report.recordings_resolved += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!("Recording retry for bot {} failed: {:#}", bot.bot_id, e);
                    report.errors.push(format!("{}: {:#}", bot.bot_id, e));
                }
            }
        }
        Ok(())
    }

    /// Sessions left completed-but-unfinalized get another summary attempt once
    /// they have been idle for the staleness window.
    async fn retry_summaries(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let idle_before = now - self.config.staleness();
        let sessions = self
            .store
            .list_unfinalized_sessions(self.config.batch_limit)
            .await?;

        for session in sessions.into_iter().filter(|s| s.updated_at < idle_before) {
            match self.terminator.generate_summary(&session.id).await {
                Ok(true) => report.summaries_retried += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Summary retry for session {} failed: {:#}", session.id, e);
                    report.errors.push(format!("{}: {:#}", session.id, e));
                }
            }
        }
        Ok(())
    }
}

//! Periodic sweep driver.

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::poller::ReconciliationPoller;

/// Run a sweep every `interval` until `cancel` fires. A sweep that overruns the
/// interval swallows the missed ticks instead of queueing them.
pub async fn run_scheduler(poller: ReconciliationPoller, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Reconciliation scheduler running every {}s", interval.as_secs());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Reconciliation scheduler stopped");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = poller.run_sweep().await {
                    error!("Reconciliation sweep failed: {:#}", e);
                }
            }
        }
    }
}

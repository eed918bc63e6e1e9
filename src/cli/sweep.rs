use anyhow::Result;

use super::args::{ReconcileCliArgs, SyncCliArgs};
use crate::app::Services;
use crate::config::Config;
use crate::db::Database;

fn services() -> Result<Services> {
    let config = Config::load()?;
    Services::from_config(&config, Database::open_default()?)
}

pub async fn handle_reconcile_command(args: ReconcileCliArgs) -> Result<()> {
    let report = services()?.poller.run_sweep().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.skipped {
        println!("Another sweep holds the lease; nothing done.");
        return Ok(());
    }
    println!("Bots checked:        {}", report.bots_checked);
    println!("Bots updated:        {}", report.bots_updated);
    println!("Orphans fixed:       {}", report.orphans_fixed);
    println!("Recordings resolved: {}", report.recordings_resolved);
    println!("Summaries retried:   {}", report.summaries_retried);
    for error in &report.errors {
        eprintln!("error: {}", error);
    }
    Ok(())
}

pub async fn handle_sync_command(args: SyncCliArgs) -> Result<()> {
    let sessions = (!args.sessions.is_empty()).then_some(args.sessions);
    let report = services()?
        .resolver
        .sync_recordings(sessions, args.limit)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Processed {} session(s): {} updated, {} failed",
        report.processed, report.updated, report.failed
    );
    for error in &report.errors {
        eprintln!("error: {}", error);
    }
    Ok(())
}

use anyhow::Result;
use clap::Parser;
use meetbot::{
    app,
    cli::{handle_reconcile_command, handle_session_command, handle_sync_command, Cli, CliCommand},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("meetbot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Reconcile(args)) => handle_reconcile_command(args).await,
        Some(CliCommand::SyncRecordings(args)) => handle_sync_command(args).await,
        Some(CliCommand::Session(args)) => handle_session_command(args).await,
        Some(CliCommand::Serve) | None => app::run_service().await,
    }
}

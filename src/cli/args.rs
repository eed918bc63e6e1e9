use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "meetbot")]
#[command(about = "Meeting bot lifecycle and recording reconciliation", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the HTTP service and the reconciliation scheduler (default)
    Serve,
    /// Run one reconciliation sweep and print the report
    Reconcile(ReconcileCliArgs),
    /// Resolve recordings for completed sessions
    SyncRecordings(SyncCliArgs),
    /// Inspect, create and archive sessions
    Session(SessionCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct ReconcileCliArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct SyncCliArgs {
    /// Only these sessions (repeatable). Default: most recent completed sessions
    #[arg(short, long = "session")]
    pub sessions: Vec<String>,
    /// Maximum number of sessions when none are named
    #[arg(short, long, default_value = "100")]
    pub limit: usize,
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct SessionCliArgs {
    #[command(subcommand)]
    pub command: SessionCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Show a session with its bot, recordings and usage
    Show {
        id: String,
    },
    /// Create a session, optionally attaching an already dispatched bot
    Create {
        /// Session id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Bot id returned by the provider at dispatch
        #[arg(long)]
        bot: Option<String>,
    },
    /// List recent sessions
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Hide a session from listings. Nothing is deleted.
    Archive {
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_archive() {
        let cli = Cli::try_parse_from(["meetbot", "session", "archive", "s-1"]).unwrap();
        match cli.command {
            Some(CliCommand::Session(SessionCliArgs {
                command: SessionCommand::Archive { id },
            })) => assert_eq!(id, "s-1"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_no_command_defaults_to_serve() {
        let cli = Cli::try_parse_from(["meetbot", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.command.is_none());
    }
}

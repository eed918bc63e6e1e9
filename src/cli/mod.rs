pub mod args;
pub mod session;
pub mod sweep;

pub use args::{Cli, CliCommand};
pub use session::handle_session_command;
pub use sweep::{handle_reconcile_command, handle_sync_command};

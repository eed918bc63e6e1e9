//! Session-level flows: user-triggered termination and the session read model.

pub mod terminator;
pub mod view;

pub use terminator::{SessionTerminator, TerminationOutcome};
pub use view::{load_session_view, SessionView};

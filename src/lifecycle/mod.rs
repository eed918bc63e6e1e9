//! Bot lifecycle: normalized status vocabulary and the state store that owns every
//! status change.

pub mod state_store;
pub mod status;

pub use state_store::{evaluate_transition, BotStateStore, TransitionOutcome, TransitionReason};
pub use status::{normalize_vendor_status, BotStatus, SessionStatus, TransitionSource};

//! Stale-bot reconciliation: the sweep itself and the interval that drives it.

pub mod poller;
pub mod scheduler;

pub use poller::{ReconciliationPoller, SweepReport, SWEEP_LEASE};
pub use scheduler::run_scheduler;

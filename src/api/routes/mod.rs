//! API route modules.

pub mod admin;
pub mod cron;
pub mod sessions;
pub mod webhooks;

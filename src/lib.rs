pub mod api;
pub mod app;
pub mod billing;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod global;
pub mod lifecycle;
pub mod provider;
pub mod reconcile;
pub mod recording;
pub mod session;
pub mod summary;
pub mod webhook;

#[cfg(test)]
mod testing;

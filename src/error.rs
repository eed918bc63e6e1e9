//! Domain errors callers branch on. Everything else travels as `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Bot {0} not found")]
    BotNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::BotNotFound(_))
    }
}

/// Find an [`EngineError`] anywhere in an anyhow chain.
pub fn engine_error(err: &anyhow::Error) -> Option<&EngineError> {
    err.chain().find_map(|cause| cause.downcast_ref::<EngineError>())
}

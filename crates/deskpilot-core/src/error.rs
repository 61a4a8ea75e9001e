//! Typed errors the agent loop branches on. Everything else travels as
//! `anyhow::Error` and ends up as a tool-result string for the model.

use thiserror::Error;

use crate::state_extractor::ExtractionError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// A run is already active; the active run is unaffected.
    #[error("an agent run is already in progress")]
    Busy,

    /// Missing provider or credentials. The loop never starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The provider failed after retries were exhausted.
    #[error("provider error: {0:#}")]
    Provider(anyhow::Error),
}

impl AgentError {
    pub fn is_busy(&self) -> bool {
        matches!(self, AgentError::Busy)
    }
}

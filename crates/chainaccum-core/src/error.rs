//! Error types for the chainaccum pipeline.

use thiserror::Error;

/// Errors that can occur while following the chain and deriving accumulator state.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("headers are not ordered: a header's parent hash does not match its predecessor")]
    HeadersUnordered,

    #[error("header {number} not found in sequence")]
    HeaderNotFound { number: u64 },

    #[error("no headers")]
    NoHeaders,

    #[error("batch does not connect to the local chain: parent of block {number} not found")]
    PrevBlockHashNotFound { number: u64 },

    #[error("not found")]
    NotFound,

    #[error("header source error: {0}")]
    Source(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("accumulator error in '{accumulator}': {reason}")]
    Accumulator { accumulator: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no accumulator handler at index {0}")]
    InvalidHandler(usize),

    #[error("indexer is already running")]
    AlreadyRunning,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for errors that only mean "nothing there yet" (cold start).
    pub fn is_empty_state(&self) -> bool {
        matches!(self, Self::NoHeaders | Self::NotFound)
    }

    /// Returns `true` if the error means the local chain view could not be
    /// reconciled with the incoming batch.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::HeadersUnordered | Self::PrevBlockHashNotFound { .. }
        )
    }

    /// Convenience constructor for accumulator-local failures.
    pub fn accumulator(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Accumulator {
            accumulator: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

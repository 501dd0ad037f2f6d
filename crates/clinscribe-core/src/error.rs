//! Error types for clinscribe-core

use thiserror::Error;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum Error {
    /// Inference layer error
    #[error("llm error: {0}")]
    Llm(#[from] clinscribe_llm::Error),

    /// Clinical input rejected before any backend call
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Pipeline cancelled or past its deadline
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

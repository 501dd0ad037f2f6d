//! Error types for clinscribe-llm

use thiserror::Error;

/// Inference error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured (missing credential or endpoint)
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// Local backend failed with a non-transient error
    #[error("AI service unavailable: {0}")]
    Unavailable(String),

    /// Transient failures persisted through every retry attempt
    #[error("timeout after {attempts} retries: {message}")]
    TimeoutAfterRetries {
        /// Attempts made, including the first call
        attempts: u32,
        /// Last error seen
        message: String,
    },

    /// Single request exceeded its deadline
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// API error with HTTP status
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message reported by the backend
        message: String,
    },

    /// Hosted backend rejected the credential (401)
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Hosted backend rate limited the request (429)
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Hosted backend is overloaded (529)
    #[error("overloaded: {0}")]
    Overloaded(String),

    /// Response body could not be parsed
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Spend cap reached before the request was sent
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Circuit breaker is open; no request was issued
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    /// Caller cancelled the operation
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Usage ledger failure
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Usage ledger table does not exist
    #[error("ledger table missing")]
    LedgerMissing,
}

impl Error {
    /// Timeout or connection-refused class failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Network(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("connection refused")
                    || lower.contains("failed to connect")
                    || lower.contains("timed out")
            }
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

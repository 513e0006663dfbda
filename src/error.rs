use thiserror::Error;

use crate::risk::RejectReason;

/// Main error type for the execution engine
#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Registration / input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    // Risk management errors
    #[error("Risk rejected: {0}")]
    RiskRejected(RejectReason),

    // Venue execution errors
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Order submission failed: {0}")]
    Submission(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Partial arbitrage failure: sell leg failed after buy leg filled on {market} ({detail})")]
    PartialLegFailure { market: String, detail: String },

    // Crypto/signing errors
    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Signature error: {0}")]
    Signature(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Transient venue-side rejections are the only errors the router retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Submission(_))
    }
}

/// Result type alias for EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

//! Domain error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("No models selected for the turn")]
    NoModels,

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl DomainError {
    /// Check if this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DomainError::Cancelled)
    }
}

/// Failure taxonomy shared by the gateway, the stream normalizer and the
/// orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidKey,
    RateLimit,
    InsufficientCredits,
    StreamStalled,
    StreamError,
    UpstreamHttpError,
    /// Malformed judge output. Recovered locally, never surfaced.
    ParseError,
    AllModelsFailed,
    /// User-initiated; not a failure.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidKey => "invalid_key",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::InsufficientCredits => "insufficient_credits",
            ErrorKind::StreamStalled => "stream_stalled",
            ErrorKind::StreamError => "stream_error",
            ErrorKind::UpstreamHttpError => "upstream_http_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::AllModelsFailed => "all_models_failed",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// HTTP status used when this kind crosses the gateway surface.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidKey => 401,
            ErrorKind::InsufficientCredits => 402,
            ErrorKind::RateLimit => 429,
            ErrorKind::StreamStalled => 504,
            ErrorKind::Cancelled => 499,
            ErrorKind::StreamError
            | ErrorKind::UpstreamHttpError
            | ErrorKind::ParseError
            | ErrorKind::AllModelsFailed => 502,
        }
    }

    /// Classify a non-2xx upstream status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::InvalidKey,
            402 => ErrorKind::InsufficientCredits,
            429 => ErrorKind::RateLimit,
            504 => ErrorKind::StreamStalled,
            _ => ErrorKind::UpstreamHttpError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::StreamStalled
                | ErrorKind::RateLimit
                | ErrorKind::StreamError
                | ErrorKind::UpstreamHttpError
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Error types for the readiness probe

use thiserror::Error;

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Errors that can occur while probing a health endpoint
#[derive(Debug, Error)]
pub enum ProbeError {
    /// HTTP request failed (connection refused, reset, timed out...)
    #[error("health request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The probe URL could not be used
    #[error("invalid health endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ProbeError {
    /// Nothing is listening yet; worth retrying while the service starts
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::RequestFailed(e) if e.is_connect())
    }

    /// The request exceeded the per-request timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestFailed(e) if e.is_timeout())
    }
}

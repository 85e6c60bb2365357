// Error types for Chain module

use crate::provider::ProviderFailure;
use thiserror::Error;

/// Transport-level failures; none of these say anything about the submitted code
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

impl From<TransportError> for ProviderFailure {
    fn from(e: TransportError) -> Self {
        ProviderFailure::Unreachable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

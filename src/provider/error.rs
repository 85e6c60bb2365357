// Error types for Provider module

use thiserror::Error;

/// A provider told us nothing about the submitted code.
///
/// The fallback chain records the failure and moves on to the next provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("timed out after {0} ms")]
    TimedOut(u64),

    #[error("authentication rejected (HTTP {0})")]
    Unauthenticated(u16),

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("HTTP {0} without a usable body")]
    BadStatus(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("empty response")]
    Empty,

    #[error("not configured")]
    NotConfigured,
}

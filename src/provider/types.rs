// Data types for Provider module

use crate::dispatch::Outcome;
use crate::provider::ProviderFailure;

/// Raw HTTP exchange result handed to an adapter for classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Two-variant classification consumed by the chain walker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The provider ran the code and judged it; the chain stops here
    Definitive(Outcome),
    /// The provider could not be used; try the next one
    Failure(ProviderFailure),
}

impl Verdict {
    pub fn is_definitive(&self) -> bool {
        matches!(self, Verdict::Definitive(_))
    }
}

/// Source as it will be submitted to one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub file_name: String,
    pub content: String,
}

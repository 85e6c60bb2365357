// Data types for Chain module

use crate::dispatch::Outcome;
use std::time::Duration;

/// Wildcard accepted by providers as "latest available version"
pub const WILDCARD_VERSION: &str = "*";

/// How a provider learns which runtime version to request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionStrategy {
    /// Always send this version string
    Fixed(String),
    /// Probe the provider's capability endpoint, caching successes only
    QueryLatest,
}

/// One entry of a language's ranked provider list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub provider_id: String,
    /// Base endpoint; `None` means the local interpreter
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub version_strategy: VersionStrategy,
}

impl ProviderDescriptor {
    pub fn local(provider_id: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            provider_id: provider_id.into(),
            endpoint: None,
            timeout_ms,
            version_strategy: VersionStrategy::QueryLatest,
        }
    }

    pub fn remote(
        provider_id: impl Into<String>,
        endpoint: impl Into<String>,
        timeout_ms: u64,
        version_strategy: VersionStrategy,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            endpoint: Some(endpoint.into()),
            timeout_ms,
            version_strategy,
        }
    }

    pub fn is_local(&self) -> bool {
        self.endpoint.is_none()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What a chain walk produced, before the dispatcher stamps elapsed time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub outcome: Outcome,
    /// Providers actually invoked, in order
    pub attempted: Vec<String>,
    /// Provider whose verdict was returned, if any
    pub provider_used: Option<String>,
}

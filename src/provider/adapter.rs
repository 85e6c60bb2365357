// Provider adapter trait - one implementation per remote backend

use crate::dispatch::LanguageId;
use crate::provider::{RawResponse, Verdict};

/// Translates one backend's request/response shape into the normalized contract.
///
/// Adapters never perform I/O; the fallback chain owns transport and timeouts.
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier reported in `meta.attemptedProviders`
    fn id(&self) -> &str;

    /// Execute endpoint derived from the descriptor's base endpoint
    fn execute_url(&self, endpoint: &str) -> String;

    /// Capability endpoint used by `VersionStrategy::QueryLatest`
    fn runtimes_url(&self, endpoint: &str) -> Option<String> {
        let _ = endpoint;
        None
    }

    /// Pick a runtime version for `language` out of a capability listing
    fn select_version(&self, runtimes: &RawResponse, language: LanguageId) -> Option<String> {
        let _ = (runtimes, language);
        None
    }

    /// Build the JSON body for one execution, applying any provider-local source transform
    fn build_request(&self, language: LanguageId, source: &str, version: &str) -> serde_json::Value;

    /// Decide whether the provider judged the code or told us nothing
    fn classify(&self, response: RawResponse) -> Verdict;
}

// Fallback chain executor - walks a ranked provider list until one answers definitively

use crate::chain::transport::Transport;
use crate::chain::types::{ChainReport, ProviderDescriptor, VersionStrategy, WILDCARD_VERSION};
use crate::chain::version::VersionCache;
use crate::dispatch::{LanguageId, Outcome};
use crate::provider::{ProviderAdapter, ProviderFailure, Verdict};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default capability-probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Walks provider chains; owns timeouts, version probing and failure classification
pub struct ChainExecutor {
    transport: Arc<dyn Transport>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    versions: VersionCache,
    probe_timeout: Duration,
}

impl ChainExecutor {
    pub fn new(transport: Arc<dyn Transport>, probe_timeout: Duration) -> Self {
        debug!(
            probe_timeout_ms = probe_timeout.as_millis() as u64,
            "initializing chain executor"
        );

        Self {
            transport,
            adapters: HashMap::new(),
            versions: VersionCache::new(),
            probe_timeout,
        }
    }

    /// Register an adapter under its own id; chains reference adapters by that id
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        info!(provider = adapter.id(), "provider registered");
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn versions(&self) -> &VersionCache {
        &self.versions
    }

    /// Try `providers` in rank order. Never fails: exhaustion is a `service_unavailable` report.
    pub async fn run_remote(
        &self,
        language: LanguageId,
        source: &str,
        providers: &[ProviderDescriptor],
        deadline: Instant,
    ) -> ChainReport {
        let mut attempted: Vec<String> = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();

        for descriptor in providers {
            let id = descriptor.provider_id.clone();

            let Some(endpoint) = descriptor.endpoint.as_deref() else {
                warn!(provider = %id, "local provider listed in a remote chain, skipping");
                failures.push((id, "local interpreter cannot serve a remote chain".to_string()));
                continue;
            };

            let Some(adapter) = self.adapters.get(&id).cloned() else {
                debug!(provider = %id, "provider not registered, skipping");
                failures.push((id, ProviderFailure::NotConfigured.to_string()));
                continue;
            };

            if remaining(deadline).is_zero() {
                warn!(provider = %id, "request budget exhausted before provider attempt");
                failures.push((id, "skipped: request time budget exhausted".to_string()));
                break;
            }

            attempted.push(id.clone());

            let version = self
                .resolve_version(adapter.as_ref(), descriptor, endpoint, language, deadline)
                .await;

            let budget = descriptor.timeout().min(remaining(deadline));
            let url = adapter.execute_url(endpoint);
            let body = adapter.build_request(language, source, &version);

            info!(
                provider = %id,
                language = %language,
                version = %version,
                timeout_ms = budget.as_millis() as u64,
                "submitting to provider"
            );

            let started = Instant::now();
            // Dropping the timed-out future cancels the in-flight HTTP request
            let verdict = match timeout(budget, self.transport.post_json(&url, &body, budget)).await
            {
                Ok(Ok(response)) => adapter.classify(response),
                Ok(Err(e)) => Verdict::Failure(e.into()),
                Err(_) => Verdict::Failure(ProviderFailure::TimedOut(budget.as_millis() as u64)),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            match verdict {
                Verdict::Definitive(outcome) => {
                    info!(
                        provider = %id,
                        status = %outcome.status(),
                        exit_code = outcome.exit_code(),
                        latency_ms = latency_ms,
                        "provider returned a definitive outcome"
                    );
                    return ChainReport {
                        outcome,
                        attempted,
                        provider_used: Some(id),
                    };
                }
                Verdict::Failure(failure) => {
                    warn!(
                        provider = %id,
                        latency_ms = latency_ms,
                        error = %failure,
                        "provider failed, trying next"
                    );
                    failures.push((id, failure.to_string()));
                }
            }
        }

        warn!(
            language = %language,
            attempted = ?attempted,
            "provider chain exhausted"
        );

        ChainReport {
            outcome: Outcome::service_unavailable(unavailable_message(language, &failures)),
            attempted,
            provider_used: None,
        }
    }

    async fn resolve_version(
        &self,
        adapter: &dyn ProviderAdapter,
        descriptor: &ProviderDescriptor,
        endpoint: &str,
        language: LanguageId,
        deadline: Instant,
    ) -> String {
        if let VersionStrategy::Fixed(version) = &descriptor.version_strategy {
            return version.clone();
        }

        if let Some(version) = self.versions.get(adapter.id(), language) {
            debug!(provider = adapter.id(), version = %version, "using cached runtime version");
            return version;
        }

        let Some(url) = adapter.runtimes_url(endpoint) else {
            return WILDCARD_VERSION.to_string();
        };

        let budget = self.probe_timeout.min(remaining(deadline));
        match timeout(budget, self.transport.get(&url, budget)).await {
            Ok(Ok(listing)) => match adapter.select_version(&listing, language) {
                Some(version) => {
                    info!(provider = adapter.id(), language = %language, version = %version, "runtime version probed");
                    self.versions.store(adapter.id(), language, version.clone());
                    version
                }
                None => {
                    warn!(
                        provider = adapter.id(),
                        language = %language,
                        status = listing.status,
                        "no runtime listed for language, using latest"
                    );
                    WILDCARD_VERSION.to_string()
                }
            },
            Ok(Err(e)) => {
                warn!(provider = adapter.id(), error = %e, "version probe failed, using latest");
                WILDCARD_VERSION.to_string()
            }
            Err(_) => {
                warn!(
                    provider = adapter.id(),
                    timeout_ms = budget.as_millis() as u64,
                    "version probe timed out, using latest"
                );
                WILDCARD_VERSION.to_string()
            }
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Operator-facing text shown verbatim when no provider could run the code
pub fn unavailable_message(language: LanguageId, failures: &[(String, String)]) -> String {
    let mut message = format!(
        "{} execution service is temporarily unavailable.",
        language.display_name()
    );

    if failures.is_empty() {
        message.push_str("\n\nNo execution providers are configured for this language.");
    } else {
        message.push_str("\n\nProviders tried:");
        for (provider, reason) in failures {
            message.push_str(&format!("\n- {}: {}", provider, reason));
        }
    }

    message.push_str(
        "\n\nSolutions:\n\
         1. Wait a few moments and try again (the public execution service may be temporarily down)\n\
         2. Check the daemon's network connection\n\
         3. Configure JDoodle as a fallback: sign up at https://www.jdoodle.com/compiler-api, \
         set JDOODLE_CLIENT_ID and JDOODLE_CLIENT_SECRET, then restart the daemon",
    );

    message
}

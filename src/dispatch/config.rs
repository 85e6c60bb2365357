// Dispatch configuration - per-language routes, timeouts and the request budget

use crate::capture::{PYTHON_ID, QUICKJS_ID};
use crate::chain::{ProviderDescriptor, VersionStrategy, DEFAULT_PROBE_TIMEOUT};
use crate::dispatch::error::{ConfigError, Result};
use crate::dispatch::types::LanguageId;
use crate::provider::{JDOODLE_DEFAULT_ENDPOINT, JDOODLE_ID, PISTON_DEFAULT_ENDPOINT, PISTON_ID};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Parse an environment variable, logging a warning if the value is present but invalid.
fn parse_env_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => match v.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(var = name, value = %v, "Invalid env var value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Ceiling for every configured timeout (one day)
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

fn secs_to_ms(secs: u64) -> u64 {
    secs.min(MAX_TIMEOUT_SECS).saturating_mul(1000)
}

/// Clamp a timeout to `MAX_TIMEOUT_SECS`, warning when it was out of range
fn bounded_secs(name: &str, secs: u64) -> u64 {
    if secs > MAX_TIMEOUT_SECS {
        warn!(var = name, value = secs, max = MAX_TIMEOUT_SECS, "Timeout out of range, clamped");
        MAX_TIMEOUT_SECS
    } else {
        secs
    }
}

/// One `[provider]` table of providers.toml
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderOverride {
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub enabled: Option<bool>,
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Piston base URL
    pub piston_endpoint: String,
    /// JDoodle base URL
    pub jdoodle_endpoint: String,
    /// Piston execute timeout (default: 30)
    pub provider_timeout_secs: u64,
    /// JDoodle execute timeout (default: 15)
    pub fallback_timeout_secs: u64,
    /// Runtime version probe timeout (default: 5)
    pub probe_timeout_secs: u64,
    /// Local interpreter wall clock (default: 30)
    pub local_timeout_secs: u64,
    /// Upper bound on one request, all providers included (default: 60)
    pub request_budget_secs: u64,
    routes: HashMap<LanguageId, Vec<ProviderDescriptor>>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let mut config = Self {
            piston_endpoint: PISTON_DEFAULT_ENDPOINT.to_string(),
            jdoodle_endpoint: JDOODLE_DEFAULT_ENDPOINT.to_string(),
            provider_timeout_secs: 30,
            fallback_timeout_secs: 15,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            local_timeout_secs: 30,
            request_budget_secs: 60,
            routes: HashMap::new(),
        };
        config.rebuild_routes();
        config
    }
}

impl DispatchConfig {
    /// Load from environment variables, then apply `PROVIDERS_TOML` if set
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = DispatchConfig::default();

        if let Ok(endpoint) = std::env::var("PISTON_ENDPOINT") {
            config.piston_endpoint = endpoint;
        }
        if let Ok(endpoint) = std::env::var("JDOODLE_ENDPOINT") {
            config.jdoodle_endpoint = endpoint;
        }
        config.provider_timeout_secs = bounded_secs(
            "PROVIDER_TIMEOUT_SECS",
            parse_env_var("PROVIDER_TIMEOUT_SECS", config.provider_timeout_secs),
        );
        config.fallback_timeout_secs = bounded_secs(
            "FALLBACK_TIMEOUT_SECS",
            parse_env_var("FALLBACK_TIMEOUT_SECS", config.fallback_timeout_secs),
        );
        config.probe_timeout_secs = bounded_secs(
            "PROBE_TIMEOUT_SECS",
            parse_env_var("PROBE_TIMEOUT_SECS", config.probe_timeout_secs),
        );
        config.local_timeout_secs = bounded_secs(
            "LOCAL_TIMEOUT_SECS",
            parse_env_var("LOCAL_TIMEOUT_SECS", config.local_timeout_secs),
        );
        config.request_budget_secs = bounded_secs(
            "REQUEST_BUDGET_SECS",
            parse_env_var("REQUEST_BUDGET_SECS", config.request_budget_secs),
        );

        if config.request_budget_secs == 0 {
            return Err(ConfigError::Invalid(
                "REQUEST_BUDGET_SECS must be greater than zero".to_string(),
            ));
        }

        config.rebuild_routes();

        if let Ok(path) = std::env::var("PROVIDERS_TOML") {
            config.apply_overrides_file(Path::new(&path))?;
        }

        Ok(config)
    }

    /// Default ranked chains: JavaScript runs locally, Python locally with the
    /// remote chain behind it, everything else remotely
    fn rebuild_routes(&mut self) {
        let local_ms = secs_to_ms(self.local_timeout_secs);
        let piston_ms = secs_to_ms(self.provider_timeout_secs);
        let jdoodle_ms = secs_to_ms(self.fallback_timeout_secs);

        let remote = |piston: VersionStrategy, jdoodle_version: &str| {
            vec![
                ProviderDescriptor::remote(PISTON_ID, &self.piston_endpoint, piston_ms, piston),
                ProviderDescriptor::remote(
                    JDOODLE_ID,
                    &self.jdoodle_endpoint,
                    jdoodle_ms,
                    VersionStrategy::Fixed(jdoodle_version.to_string()),
                ),
            ]
        };

        let mut routes = HashMap::new();
        routes.insert(
            LanguageId::JavaScript,
            vec![ProviderDescriptor::local(QUICKJS_ID, local_ms)],
        );
        let mut python = vec![ProviderDescriptor::local(PYTHON_ID, local_ms)];
        python.extend(remote(VersionStrategy::QueryLatest, "4"));
        routes.insert(LanguageId::Python, python);
        routes.insert(
            LanguageId::Java,
            remote(VersionStrategy::Fixed("15".to_string()), "3"),
        );
        routes.insert(LanguageId::C, remote(VersionStrategy::QueryLatest, "5"));
        routes.insert(LanguageId::Cpp, remote(VersionStrategy::QueryLatest, "5"));

        self.routes = routes;
    }

    /// Read and apply a providers.toml file
    pub fn apply_overrides_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: PathBuf::from(path),
            source,
        })?;
        self.apply_overrides_str(&text)?;
        info!(path = %path.display(), "Provider overrides applied");
        Ok(())
    }

    /// Apply overrides keyed by provider id, e.g. `[piston] timeout_secs = 10`
    pub fn apply_overrides_str(&mut self, text: &str) -> Result<()> {
        let overrides: HashMap<String, ProviderOverride> = toml::from_str(text)?;

        for (provider_id, entry) in &overrides {
            if entry.endpoint.as_deref().is_some_and(|e| e.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "empty endpoint for provider {}",
                    provider_id
                )));
            }
            if entry.timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "zero timeout for provider {}",
                    provider_id
                )));
            }

            let mut matched = false;
            for chain in self.routes.values_mut() {
                if entry.enabled == Some(false) {
                    let before = chain.len();
                    chain.retain(|d| &d.provider_id != provider_id);
                    matched |= chain.len() != before;
                    continue;
                }
                for descriptor in chain.iter_mut().filter(|d| &d.provider_id == provider_id) {
                    matched = true;
                    if let Some(timeout) = entry.timeout_secs {
                        descriptor.timeout_ms = secs_to_ms(timeout);
                    }
                    if let (Some(endpoint), false) = (&entry.endpoint, descriptor.is_local()) {
                        descriptor.endpoint = Some(endpoint.clone());
                    }
                }
            }

            if !matched {
                warn!(provider = %provider_id, "Override for unknown provider ignored");
            }
        }

        Ok(())
    }

    /// Replace a language's ranked provider list
    pub fn set_route(&mut self, language: LanguageId, providers: Vec<ProviderDescriptor>) {
        self.routes.insert(language, providers);
    }

    pub fn with_route(mut self, language: LanguageId, providers: Vec<ProviderDescriptor>) -> Self {
        self.set_route(language, providers);
        self
    }

    /// Ranked providers for `language`; empty when nothing is routed
    pub fn route(&self, language: LanguageId) -> &[ProviderDescriptor] {
        self.routes.get(&language).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn request_budget(&self) -> Duration {
        Duration::from_secs(self.request_budget_secs.min(MAX_TIMEOUT_SECS))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.min(MAX_TIMEOUT_SECS))
    }
}

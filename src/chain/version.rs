// Per-process cache of probed runtime versions

use crate::dispatch::LanguageId;
use std::collections::HashMap;
use std::sync::RwLock;

/// Successful version probes keyed by (provider, language).
///
/// Failed probes are never stored, so the next request probes again.
#[derive(Debug, Default)]
pub struct VersionCache {
    entries: RwLock<HashMap<(String, LanguageId), String>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, provider_id: &str, language: LanguageId) -> Option<String> {
        let entries = self.entries.read().ok()?;
        entries.get(&(provider_id.to_string(), language)).cloned()
    }

    pub fn store(&self, provider_id: &str, language: LanguageId, version: impl Into<String>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert((provider_id.to_string(), language), version.into());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_overwrites() {
        let cache = VersionCache::new();
        assert!(cache.get("piston", LanguageId::C).is_none());

        cache.store("piston", LanguageId::C, "10.2.0");
        cache.store("piston", LanguageId::C, "11.0.0");

        assert_eq!(cache.get("piston", LanguageId::C).as_deref(), Some("11.0.0"));
        assert!(cache.get("piston", LanguageId::Cpp).is_none());
        assert_eq!(cache.len(), 1);
    }
}

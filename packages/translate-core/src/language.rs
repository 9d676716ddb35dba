//! Language-pair validation against an upstream capability oracle, with a
//! safe degraded mode when that oracle is unavailable (component C).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::protocol_constants::DEGRADED_LANGUAGE_SAFE_LIST;

/// Reasons `validate_pair` can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LanguageValidationError {
    #[error("unsupported source language: {0}")]
    BadSource(String),
    #[error("unsupported target language: {0}")]
    BadTarget(String),
    #[error("unsupported language pair: {0} -> {1}")]
    UnsupportedPair(String, String),
}

/// The upstream service that reports which source/target languages are
/// currently supported. Queried at start-up and refreshed hourly.
#[async_trait]
pub trait CapabilityOracle: Send + Sync {
    async fn fetch_supported(&self) -> Option<(HashSet<String>, HashSet<String>)>;
}

/// In-memory oracle for tests: returns a fixed capability set, or `None` to
/// simulate an outage and exercise the degraded-mode fallback.
pub struct StaticCapabilityOracle {
    pub sources: Option<HashSet<String>>,
    pub targets: Option<HashSet<String>>,
}

#[async_trait]
impl CapabilityOracle for StaticCapabilityOracle {
    async fn fetch_supported(&self) -> Option<(HashSet<String>, HashSet<String>)> {
        match (&self.sources, &self.targets) {
            (Some(s), Some(t)) => Some((s.clone(), t.clone())),
            _ => None,
        }
    }
}

#[derive(serde::Deserialize)]
struct CapabilityDoc {
    sources: HashSet<String>,
    targets: HashSet<String>,
}

/// Fetches the capability document over HTTP via the shared `reqwest::Client`.
/// Any transport or parse failure surfaces as `None`, which `refresh` treats
/// as an outage and falls back to the safe-list.
pub struct HttpCapabilityOracle {
    client: reqwest::Client,
    url: String,
}

impl HttpCapabilityOracle {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl CapabilityOracle for HttpCapabilityOracle {
    async fn fetch_supported(&self) -> Option<(HashSet<String>, HashSet<String>)> {
        let resp = self.client.get(&self.url).send().await.ok()?;
        let doc: CapabilityDoc = resp.json().await.ok()?;
        Some((doc.sources, doc.targets))
    }
}

struct Capability {
    sources: HashSet<String>,
    targets: HashSet<String>,
}

/// Read-mostly cache of supported (source, target) language sets, guarded by
/// a read-write lock, with a built-in safe-list fallback for degraded mode.
pub struct LanguageValidator {
    capability: RwLock<Capability>,
    /// Tracks whether the degraded-mode warning has already been logged for
    /// the current refresh cycle (P6: exactly once per cycle).
    degraded_logged: AtomicBool,
}

impl LanguageValidator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            capability: RwLock::new(Capability {
                sources: HashSet::new(),
                targets: HashSet::new(),
            }),
            degraded_logged: AtomicBool::new(false),
        }
    }

    fn safe_list() -> HashSet<String> {
        DEGRADED_LANGUAGE_SAFE_LIST.iter().map(|s| s.to_string()).collect()
    }

    /// Refreshes the cache from `oracle`. If the oracle is unavailable or
    /// returns empty sets, falls back to the built-in safe-list and resets
    /// the degraded-mode log flag so the next `validate_pair` call logs once.
    pub async fn refresh(&self, oracle: &dyn CapabilityOracle) {
        let fetched = oracle.fetch_supported().await;
        let (sources, targets) = match fetched {
            Some((s, t)) if !s.is_empty() && !t.is_empty() => {
                self.degraded_logged.store(false, Ordering::SeqCst);
                (s, t)
            }
            _ => {
                self.degraded_logged.store(false, Ordering::SeqCst);
                (Self::safe_list(), Self::safe_list())
            }
        };
        let mut guard = self.capability.write();
        guard.sources = sources;
        guard.targets = targets;
    }

    fn is_degraded(&self) -> bool {
        let guard = self.capability.read();
        guard.sources == Self::safe_list() && guard.targets == Self::safe_list()
    }

    /// Validates a (source, target) language pair.
    pub fn validate_pair(&self, source: &str, target: &str) -> Result<(), LanguageValidationError> {
        if self.is_degraded() && !self.degraded_logged.swap(true, Ordering::SeqCst) {
            tracing::warn!(source, target, "degraded_validator");
        }

        let guard = self.capability.read();
        if !guard.sources.contains(source) {
            return Err(LanguageValidationError::BadSource(source.to_string()));
        }
        if !guard.targets.contains(target) {
            return Err(LanguageValidationError::BadTarget(target.to_string()));
        }
        Ok(())
    }
}

impl Default for LanguageValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_oracle() -> StaticCapabilityOracle {
        StaticCapabilityOracle {
            sources: Some(["en".to_string(), "fr".to_string()].into_iter().collect()),
            targets: Some(["fr".to_string(), "es".to_string()].into_iter().collect()),
        }
    }

    fn empty_oracle() -> StaticCapabilityOracle {
        StaticCapabilityOracle {
            sources: None,
            targets: None,
        }
    }

    #[tokio::test]
    async fn validates_known_pair() {
        let validator = LanguageValidator::new();
        validator.refresh(&populated_oracle()).await;
        assert!(validator.validate_pair("en", "fr").is_ok());
    }

    #[tokio::test]
    async fn rejects_unknown_source() {
        let validator = LanguageValidator::new();
        validator.refresh(&populated_oracle()).await;
        assert_eq!(
            validator.validate_pair("de", "fr"),
            Err(LanguageValidationError::BadSource("de".to_string()))
        );
    }

    #[tokio::test]
    async fn rejects_unknown_target() {
        let validator = LanguageValidator::new();
        validator.refresh(&populated_oracle()).await;
        assert_eq!(
            validator.validate_pair("en", "de"),
            Err(LanguageValidationError::BadTarget("de".to_string()))
        );
    }

    #[tokio::test]
    async fn falls_back_to_safe_list_when_oracle_empty() {
        let validator = LanguageValidator::new();
        validator.refresh(&empty_oracle()).await;
        assert!(validator.validate_pair("en", "fr").is_ok());
    }

    #[tokio::test]
    async fn same_source_and_target_is_allowed_when_oracle_permits_it() {
        let validator = LanguageValidator::new();
        validator.refresh(&populated_oracle()).await;
        assert!(validator.validate_pair("fr", "fr").is_ok());
    }
}

//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use translate_core::Config as CoreConfig;

/// Server configuration loaded from YAML with environment overrides.
///
/// A thin wrapper around `translate_core::Config` that adds the env-var
/// override layer; every field maps 1:1 onto a core config field.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_port: u16,
    pub batch_window_secs: u64,
    pub batch_frame_count: usize,
    pub worker_pool_size: usize,
    pub jwt_audience: String,
    /// Override: `TRANSLATE_JWKS_URL`. Empty disables remote JWKS fetch.
    pub jwks_url: String,
    /// Override: `TRANSLATE_LANGUAGE_ORACLE_URL`. Empty disables remote fetch.
    pub language_oracle_url: String,
    pub session_ttl_secs: u64,
    pub connection_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = CoreConfig::default();
        Self {
            bind_port: core.preferred_port,
            batch_window_secs: core.batch_window_secs,
            batch_frame_count: core.batch_frame_count,
            worker_pool_size: core.worker_pool_size,
            jwt_audience: core.jwt_audience,
            jwks_url: core.jwks_url,
            language_oracle_url: core.language_oracle_url,
            session_ttl_secs: core.session_ttl_secs,
            connection_ttl_secs: core.connection_ttl_secs,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TRANSLATE_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }
        if let Ok(val) = std::env::var("TRANSLATE_JWKS_URL") {
            self.jwks_url = val;
        }
        if let Ok(val) = std::env::var("TRANSLATE_LANGUAGE_ORACLE_URL") {
            self.language_oracle_url = val;
        }
        if let Ok(val) = std::env::var("TRANSLATE_JWT_AUDIENCE") {
            self.jwt_audience = val;
        }
    }

    /// Converts to `translate_core`'s `Config` type, keeping every field this
    /// wrapper doesn't override at the core crate's own default.
    pub fn to_core_config(&self) -> CoreConfig {
        CoreConfig {
            preferred_port: self.bind_port,
            batch_window_secs: self.batch_window_secs,
            batch_frame_count: self.batch_frame_count,
            worker_pool_size: self.worker_pool_size,
            jwt_audience: self.jwt_audience.clone(),
            jwks_url: self.jwks_url.clone(),
            language_oracle_url: self.language_oracle_url.clone(),
            session_ttl_secs: self.session_ttl_secs,
            connection_ttl_secs: self.connection_ttl_secs,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_core_config_defaults() {
        let server = ServerConfig::default();
        let core = server.to_core_config();
        assert_eq!(core.batch_window_secs, CoreConfig::default().batch_window_secs);
        assert_eq!(core.worker_pool_size, CoreConfig::default().worker_pool_size);
    }
}

//! Application configuration.
//!
//! A single [`Config`] struct groups every tunable named in the component
//! design (§4) and the concurrency/resource model (§5): batch window and
//! count, worker pool size, per-step timeouts, blob presign TTL, auth/oracle
//! cache TTLs, connection/session TTLs, reaper cadence, and WS heartbeat
//! timing. All fields have sensible defaults so a deployment can start from
//! `Config::default()` and override only what it needs.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_BATCH_FRAME_COUNT, DEFAULT_BATCH_WINDOW_SECS, DEFAULT_CONNECTION_TTL_SECS,
    DEFAULT_INGEST_HIGH_WATER_MARK, DEFAULT_PRESIGN_TTL_SECS, DEFAULT_SESSION_TTL_SECS,
    DEFAULT_WORKER_POOL_SIZE, LANGUAGE_ORACLE_REFRESH_SECS, NOTIFY_TIMEOUT_SECS,
    PERSIST_TIMEOUT_SECS, REAPER_SWEEP_INTERVAL_SECS, SIGNING_KEY_CACHE_TTL_SECS,
    STT_TIMEOUT_SECS, SYNTHESIZE_TIMEOUT_SECS, TRANSLATE_TIMEOUT_SECS,
    WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS,
};

/// Configuration for the real-time audio translation pipeline.
///
/// Deserializable from YAML (`serde_yaml`), with every field defaulted so a
/// partial config file only needs to name the overrides. See
/// `translate-server`'s `ServerConfig` for the env-var override layer on top
/// of this.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS server (0 = auto-allocate).
    pub preferred_port: u16,

    // Ingest bus (component F)
    /// Batch window in seconds; a batch closes once its oldest frame is this old.
    pub batch_window_secs: u64,
    /// Frame-count threshold that force-closes a batch early.
    pub batch_frame_count: usize,
    /// High-water mark of un-emitted frames before the bus starts dropping.
    pub ingest_high_water_mark: usize,

    // Worker pool (component G)
    /// Number of concurrent workers draining the batch queue.
    pub worker_pool_size: usize,
    /// STT call timeout, seconds.
    pub stt_timeout_secs: u64,
    /// Per-target translate call timeout, seconds.
    pub translate_timeout_secs: u64,
    /// Per-target synthesize call timeout, seconds.
    pub synthesize_timeout_secs: u64,
    /// Blob persist call timeout, seconds.
    pub persist_timeout_secs: u64,
    /// Per-connection notify call timeout, seconds.
    pub notify_timeout_secs: u64,

    // Blob store (component H)
    /// Presigned fetch URL expiry, seconds.
    pub presign_ttl_secs: u64,

    // Auth / language oracle (components C, D)
    /// JWKS signing-key cache TTL, seconds.
    pub signing_key_cache_ttl_secs: u64,
    /// Language-capability-oracle refresh interval, seconds.
    pub language_oracle_refresh_secs: u64,
    /// Expected JWT audience claim.
    pub jwt_audience: String,
    /// URL of the JWKS document. Empty disables remote fetch (degraded auth
    /// mode: every token verification fails closed to anonymous).
    pub jwks_url: String,
    /// URL of the language-capability oracle document. Empty disables
    /// remote fetch (degraded mode: the built-in safe-list is used).
    pub language_oracle_url: String,

    // Session / connection lifecycle
    /// Default session TTL, seconds.
    pub session_ttl_secs: u64,
    /// Default connection TTL, seconds.
    pub connection_ttl_secs: u64,
    /// Interval between reaper sweeps, seconds.
    pub reaper_sweep_interval_secs: u64,

    // WebSocket
    /// Idle-connection heartbeat timeout, seconds.
    pub ws_heartbeat_timeout_secs: u64,
    /// Interval between heartbeat checks, seconds.
    pub ws_heartbeat_check_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            batch_window_secs: DEFAULT_BATCH_WINDOW_SECS,
            batch_frame_count: DEFAULT_BATCH_FRAME_COUNT,
            ingest_high_water_mark: DEFAULT_INGEST_HIGH_WATER_MARK,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            stt_timeout_secs: STT_TIMEOUT_SECS,
            translate_timeout_secs: TRANSLATE_TIMEOUT_SECS,
            synthesize_timeout_secs: SYNTHESIZE_TIMEOUT_SECS,
            persist_timeout_secs: PERSIST_TIMEOUT_SECS,
            notify_timeout_secs: NOTIFY_TIMEOUT_SECS,
            presign_ttl_secs: DEFAULT_PRESIGN_TTL_SECS,
            signing_key_cache_ttl_secs: SIGNING_KEY_CACHE_TTL_SECS,
            language_oracle_refresh_secs: LANGUAGE_ORACLE_REFRESH_SECS,
            jwt_audience: "translate-pipeline".to_string(),
            jwks_url: String::new(),
            language_oracle_url: String::new(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            connection_ttl_secs: DEFAULT_CONNECTION_TTL_SECS,
            reaper_sweep_interval_secs: REAPER_SWEEP_INTERVAL_SECS,
            ws_heartbeat_timeout_secs: WS_HEARTBEAT_TIMEOUT_SECS,
            ws_heartbeat_check_interval_secs: WS_HEARTBEAT_CHECK_INTERVAL_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_sensible() {
        let config = Config::default();
        assert_eq!(config.preferred_port, 0);
        assert_eq!(config.batch_window_secs, 3);
        assert!(config.worker_pool_size > 0);
    }

    #[test]
    fn config_roundtrips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.batch_frame_count, config.batch_frame_count);
    }

    #[test]
    fn partial_yaml_fills_remaining_fields_from_default() {
        let parsed: Config = serde_yaml::from_str("preferred_port: 9000\n").unwrap();
        assert_eq!(parsed.preferred_port, 9000);
        assert_eq!(parsed.worker_pool_size, Config::default().worker_pool_size);
    }
}

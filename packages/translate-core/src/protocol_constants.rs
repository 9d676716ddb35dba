//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the wire protocol and the component contracts
//! in the design document; changing them would break compatibility with
//! existing clients or violate a stated timeout budget.

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket close codes
// ─────────────────────────────────────────────────────────────────────────────

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_SERVER_ERROR: u16 = 1011;
pub const CLOSE_BAD_REQUEST: u16 = 4000;
pub const CLOSE_POLICY_VIOLATION_APP: u16 = 4001;
pub const CLOSE_NOT_FOUND: u16 = 4004;

// ─────────────────────────────────────────────────────────────────────────────
// Ingest bus / batching (component F)
// ─────────────────────────────────────────────────────────────────────────────

/// Default batch window (seconds). A batch closes when its oldest frame is
/// older than this, even if the frame-count threshold hasn't been reached.
pub const DEFAULT_BATCH_WINDOW_SECS: u64 = 3;

/// Default frame-count threshold that force-closes a batch early.
pub const DEFAULT_BATCH_FRAME_COUNT: usize = 100;

/// Default high-water mark of un-emitted frames across all sessions before
/// the bus starts dropping the oldest frames of the most-behind session.
pub const DEFAULT_INGEST_HIGH_WATER_MARK: usize = 5000;

// ─────────────────────────────────────────────────────────────────────────────
// Worker pool timeouts (component G)
// ─────────────────────────────────────────────────────────────────────────────

pub const STT_TIMEOUT_SECS: u64 = 30;
pub const TRANSLATE_TIMEOUT_SECS: u64 = 5;
pub const SYNTHESIZE_TIMEOUT_SECS: u64 = 10;
pub const PERSIST_TIMEOUT_SECS: u64 = 5;
pub const NOTIFY_TIMEOUT_SECS: u64 = 2;

/// Maximum chunk size (bytes) fed to the STT port per `feed` call, per the
/// reference STT port's reported limit.
pub const STT_MAX_FEED_CHUNK_BYTES: usize = 16 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Blob store (component H)
// ─────────────────────────────────────────────────────────────────────────────

/// Default presigned fetch URL expiry (seconds).
pub const DEFAULT_PRESIGN_TTL_SECS: u64 = 600;

/// Retention tag requested on every translated-chunk object.
pub const BLOB_RETENTION_HOURS: u64 = 24;

// ─────────────────────────────────────────────────────────────────────────────
// Auth / language oracle (components C, D)
// ─────────────────────────────────────────────────────────────────────────────

/// TTL for the cached JWKS signing-key set.
pub const SIGNING_KEY_CACHE_TTL_SECS: u64 = 3600;

/// Refresh interval for the supported-language capability oracle.
pub const LANGUAGE_ORACLE_REFRESH_SECS: u64 = 3600;

/// Built-in safe-list used when the capability oracle is unavailable.
pub const DEGRADED_LANGUAGE_SAFE_LIST: &[&str] =
    &["en", "es", "fr", "de", "it", "pt", "ja", "ko", "zh", "ar"];

// ─────────────────────────────────────────────────────────────────────────────
// Identifier allocator (component A)
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum collision retries before `new_id` surfaces a fatal error.
pub const ID_ALLOCATION_MAX_RETRIES: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor / reaper (component I)
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between TTL-reaper sweeps.
pub const REAPER_SWEEP_INTERVAL_SECS: u64 = 5;

/// WebSocket heartbeat timeout (seconds) - idle connections are closed.
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;

/// Capacity of the broadcast channel used to fan session-lifecycle events
/// out to interested subscribers (e.g. the reaper's notifier hookup).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default number of workers in the translation worker pool.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;

/// Capacity of the bounded channel feeding the worker pool from the ingest
/// bus. A full queue back-pressures the bus (§5 "worker pool input queue").
pub const WORKER_QUEUE_CAPACITY: usize = 256;

/// Capacity of the bounded per-connection outbound queue (§5 resource caps).
pub const CONNECTION_OUTBOUND_QUEUE_CAPACITY: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Session / connection TTL (§9 open question: independent TTLs, earlier wins)
// ─────────────────────────────────────────────────────────────────────────────

/// Default session time-to-live (seconds) before the reaper sweep reclaims it.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 4 * 3600;

/// Default connection time-to-live (seconds).
pub const DEFAULT_CONNECTION_TTL_SECS: u64 = 3600;

/// Default application name, used in log records and the HTTP admin surface.
pub const APP_NAME: &str = "translate-core";

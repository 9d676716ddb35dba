//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together (component I, the
//! supervisor). This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthVerifier, HttpJwksSource, JwksSource, StaticJwksSource};
use crate::clock::{Clock, SystemClock};
use crate::language::{CapabilityOracle, HttpCapabilityOracle, LanguageValidator, StaticCapabilityOracle};
use crate::model::AudioBatch;
use crate::ports::{BlobStore, Stt, Synthesize, Translate};
use crate::protocol_constants::{APP_NAME, WORKER_QUEUE_CAPACITY};
use crate::runtime::TokioSpawner;
use crate::services::{Gateway, IngestBus, IngestBusConfig, SessionConnectionStore, TranslationWorkerPool};
use crate::state::Config;

/// Container for all bootstrapped services.
///
/// Holds every wired service plus the handles needed to drive the
/// shutdown sequence (§4.I: stop accepting -> drain ingest bus -> drain
/// worker pool -> close gateway -> exit).
#[derive(Clone)]
pub struct BootstrappedServices {
    pub store: Arc<SessionConnectionStore>,
    pub language: Arc<LanguageValidator>,
    pub auth: Arc<AuthVerifier>,
    pub ingest: Arc<IngestBus>,
    pub gateway: Arc<Gateway>,
    pub worker_pool: Arc<TranslationWorkerPool>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
    /// Shared HTTP client for the capability oracle and JWKS fetch.
    http_client: Client,
    pub spawner: TokioSpawner,
    pub cancel_token: CancellationToken,
    worker_handles: Arc<parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
    reaper_handle: Arc<parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    #[must_use]
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Initiates graceful shutdown per the §4.I sequence. The caller is
    /// responsible for having already stopped accepting new WebSocket
    /// upgrades before calling this.
    pub async fn shutdown(&self) {
        tracing::info!(app = APP_NAME, "supervisor: beginning graceful shutdown");
        self.cancel_token.cancel();

        let handles = std::mem::take(&mut *self.worker_handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        if let Some(reaper) = self.reaper_handle.lock().take() {
            let _ = reaper.await;
        }

        tracing::info!(app = APP_NAME, "supervisor: shutdown complete");
    }
}

/// Creates the shared HTTP client used for the capability-oracle and JWKS
/// fetches.
fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies, using real
/// upstream adapters for STT/translate/synthesize/blob-store.
///
/// Wiring order:
/// 1. Shared infrastructure (HTTP client, cancellation token, clock).
/// 2. Session/connection store (component B).
/// 3. Language validator (component C) and auth verifier (component D),
///    each backed by an HTTP adapter when a URL is configured, a static
///    (degraded) fake otherwise.
/// 4. Ingest bus (component F), wired to a bounded channel feeding the
///    worker pool.
/// 5. Gateway (component E), which implements `Notifier` directly.
/// 6. Worker pool (component G), wired to the store, the real upstream
///    ports, and the gateway as its `Notifier`.
/// 7. Background loops: ingest bus sweep ticker and the reaper sweep
///    (§10.6), both cancellable via the shared token.
#[allow(clippy::too_many_arguments)]
pub fn bootstrap_services(
    config: Config,
    stt: Arc<dyn Stt>,
    translate: Arc<dyn Translate>,
    synthesize: Arc<dyn Synthesize>,
    blob_store: Arc<dyn BlobStore>,
) -> BootstrappedServices {
    let config = Arc::new(config);
    let spawner = TokioSpawner::current();
    let http_client = create_http_client();
    let cancel_token = CancellationToken::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Arc::new(SessionConnectionStore::new());

    let language = Arc::new(LanguageValidator::new());
    let oracle: Arc<dyn CapabilityOracle> = if config.language_oracle_url.is_empty() {
        Arc::new(StaticCapabilityOracle { sources: None, targets: None })
    } else {
        Arc::new(HttpCapabilityOracle::new(http_client.clone(), config.language_oracle_url.clone()))
    };

    let jwks_source: Arc<dyn JwksSource> = if config.jwks_url.is_empty() {
        Arc::new(StaticJwksSource { keys: None })
    } else {
        Arc::new(HttpJwksSource::new(http_client.clone(), config.jwks_url.clone()))
    };
    let auth = Arc::new(AuthVerifier::with_ttl_secs(
        jwks_source,
        config.jwt_audience.clone(),
        config.signing_key_cache_ttl_secs,
    ));

    let (batches_tx, batches_rx) = mpsc::channel::<AudioBatch>(WORKER_QUEUE_CAPACITY);
    let ingest_config = IngestBusConfig {
        window_secs: config.batch_window_secs,
        frame_count_threshold: config.batch_frame_count,
        high_water_mark: config.ingest_high_water_mark,
    };
    let ingest = Arc::new(IngestBus::new(ingest_config, clock.clone(), batches_tx));

    let gateway = Arc::new(Gateway::new(
        Arc::clone(&store),
        Arc::clone(&language),
        Arc::clone(&auth),
        Arc::clone(&ingest),
        clock.clone(),
        Arc::clone(&config),
    ));

    let worker_pool = Arc::new(TranslationWorkerPool::new(
        Arc::clone(&store),
        stt,
        translate,
        synthesize,
        blob_store,
        Arc::clone(&gateway) as Arc<dyn crate::events::Notifier>,
        clock.clone(),
        Arc::clone(&config),
    ));
    let worker_handles = worker_pool.spawn(batches_rx);

    let reaper_handle = spawn_reaper(
        Arc::clone(&gateway),
        Arc::clone(&store),
        Arc::clone(&language),
        Arc::clone(&oracle),
        Arc::clone(&auth),
        Arc::clone(&config),
        cancel_token.clone(),
    );

    spawn_ingest_sweeper(Arc::clone(&ingest), cancel_token.clone());

    BootstrappedServices {
        store,
        language,
        auth,
        ingest,
        gateway,
        worker_pool,
        clock,
        config,
        http_client,
        spawner,
        cancel_token,
        worker_handles: Arc::new(parking_lot::Mutex::new(worker_handles)),
        reaper_handle: Arc::new(parking_lot::Mutex::new(Some(reaper_handle))),
    }
}

/// Periodic ingest-bus window closure, matching the source's periodic-check
/// background-task idiom (§10.6).
fn spawn_ingest_sweeper(ingest: Arc<IngestBus>, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => ingest.sweep(),
            }
        }
    });
}

/// The supervisor's reaper sweep (§10.6): TTL eviction, hourly oracle and
/// signing-key refreshes, and coarse gauge logging.
fn spawn_reaper(
    gateway: Arc<Gateway>,
    store: Arc<SessionConnectionStore>,
    language: Arc<LanguageValidator>,
    oracle: Arc<dyn CapabilityOracle>,
    auth: Arc<AuthVerifier>,
    config: Arc<Config>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep_ticker = tokio::time::interval(Duration::from_secs(config.reaper_sweep_interval_secs.max(1)));
        let mut refresh_ticker = tokio::time::interval(Duration::from_secs(config.language_oracle_refresh_secs.max(1)));
        language.refresh(oracle.as_ref()).await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = sweep_ticker.tick() => gateway.reap_expired().await,
                _ = refresh_ticker.tick() => {
                    language.refresh(oracle.as_ref()).await;
                    auth.refresh_if_stale(SystemClock.now_millis()).await;
                    tracing::info!(
                        active_sessions = store.active_session_count(),
                        active_connections = store.all_connections().len(),
                        "supervisor: periodic refresh complete"
                    );
                }
            }
        }
    })
}

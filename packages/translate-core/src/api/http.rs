//! HTTP handlers: liveness/readiness probes, session creation, and the
//! WebSocket route. Everything that needs the session/connection store, the
//! ingest bus, or the worker pool goes through `AppState`; handlers stay
//! thin and delegate to `Gateway`/`SessionConnectionStore`.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_ok, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::PipelineError;

/// Builds the application's router: health/readiness probes, session
/// creation, and the WebSocket upgrade.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{session_id}", get(get_session))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health` - liveness only, no dependency checks.
async fn health_check() -> Response {
    api_ok(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct ReadinessBody {
    status: &'static str,
    active_sessions: usize,
    active_connections: usize,
    batches_processed: u64,
    batches_dropped_no_listeners: u64,
    stt_failures: u64,
    ingest_dropped_frames: u64,
}

/// `GET /ready` - reports the coarse gauges a deployment's readiness probe
/// and dashboards care about: the same counters the reaper logs on its
/// periodic refresh (`bootstrap::spawn_reaper`), plus worker-pool stats.
async fn readiness_check(State(state): State<AppState>) -> Response {
    let stats = state.worker_pool.stats();
    let body = ReadinessBody {
        status: "ready",
        active_sessions: state.store.active_session_count(),
        active_connections: state.store.all_connections().len(),
        batches_processed: stats.batches_processed.load(Ordering::Relaxed),
        batches_dropped_no_listeners: stats.batches_dropped_no_listeners.load(Ordering::Relaxed),
        stt_failures: stats.stt_failures.load(Ordering::Relaxed),
        ingest_dropped_frames: state.gateway.ingest().dropped_frame_count(),
    };
    api_ok(body)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    source_language: String,
    #[serde(default)]
    configured_targets: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: String,
    owner_id: String,
    source_language: String,
    configured_targets: Vec<String>,
    expires_at: u64,
}

/// `POST /api/sessions` - a speaker's first control message (§3 Lifecycle):
/// allocates a session ID, records the caller as owner (anonymous if the
/// bearer token doesn't verify), and validates every advisory target
/// against the source language before the session is ever joined over the
/// WebSocket.
async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let token = bearer_token(&headers);
    let principal = state.gateway.auth().verify(token.as_deref(), crate::utils::now_millis()).await;

    for target in &req.configured_targets {
        if let Err(e) = state.gateway.language().validate_pair(&req.source_language, target) {
            return PipelineError::Validation(e.to_string()).into_response();
        }
    }

    let session_id = match state.gateway.new_session_id() {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    let session = state.gateway.create_session(
        session_id,
        principal.user_id,
        req.source_language,
        req.configured_targets,
    );

    api_success(
        StatusCode::CREATED,
        CreateSessionResponse {
            session_id: session.session_id,
            owner_id: session.owner_id,
            source_language: session.source_language,
            configured_targets: session.configured_targets,
            expires_at: session.expires_at,
        },
    )
}

/// `GET /api/sessions/{sessionId}` - lets a client poll whether a session is
/// still active before attempting the WebSocket handshake.
async fn get_session(
    State(state): State<AppState>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
) -> Response {
    match state.store.get_session(&session_id) {
        Some(session) => api_ok(session),
        None => PipelineError::NotFound(format!("session {session_id} not found")).into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthVerifier, StaticJwksSource};
    use crate::clock::{Clock, FakeClock};
    use crate::language::{LanguageValidator, StaticCapabilityOracle};
    use crate::services::{Gateway, IngestBus, IngestBusConfig, SessionConnectionStore, TranslationWorkerPool};
    use crate::state::Config;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let store = Arc::new(SessionConnectionStore::new());
        let language = Arc::new(LanguageValidator::new());
        language
            .refresh(&StaticCapabilityOracle {
                sources: Some(["en".to_string()].into_iter().collect()),
                targets: Some(["fr".to_string()].into_iter().collect()),
            })
            .await;
        let auth = Arc::new(AuthVerifier::new(Arc::new(StaticJwksSource { keys: None }), "aud"));
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
        let config = Arc::new(Config::default());
        let (batch_tx, batch_rx) = tokio::sync::mpsc::channel(16);
        let ingest = Arc::new(IngestBus::new(IngestBusConfig::default(), clock.clone(), batch_tx));
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
            Arc::new(crate::ports::FakeStt::new("hello")),
            Arc::new(crate::ports::FakeTranslate::new()),
            Arc::new(crate::ports::FakeSynthesize::new(128)),
            Arc::new(crate::ports::InMemoryBlobStore::new()),
            Arc::clone(&gateway) as Arc<dyn crate::events::Notifier>,
            clock.clone(),
            Arc::clone(&config),
        ));
        let _ = worker_pool.spawn(batch_rx);

        AppState::builder()
            .gateway(gateway)
            .store(store)
            .worker_pool(worker_pool)
            .config(config)
            .build()
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_reports_zero_sessions_initially() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["activeSessions"], 0);
    }

    #[tokio::test]
    async fn create_session_allocates_id_and_sets_expiry() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({ "sourceLanguage": "en", "configuredTargets": ["fr"] }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["sessionId"].as_str().unwrap().contains('-'));
        assert_eq!(body["ownerId"], "");
    }

    #[tokio::test]
    async fn create_session_rejects_unsupported_target() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({ "sourceLanguage": "en", "configuredTargets": ["de"] }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_session_returns_not_found_for_unknown_id() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/api/sessions/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

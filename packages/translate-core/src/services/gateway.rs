//! WebSocket control-plane gateway (component E).
//!
//! Owns connection acceptance, role classification, inbound message routing,
//! and disconnect cleanup. Implements [`Notifier`] directly rather than
//! handing the worker pool a reference to the whole gateway, which would
//! otherwise create an `Arc` cycle (gateway -> worker pool -> gateway); the
//! worker pool only ever sees `Arc<dyn Notifier>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::auth::AuthVerifier;
use crate::clock::Clock;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{Notifier, OutboundFrame};
use crate::language::LanguageValidator;
use crate::model::{Connection, Role};
use crate::protocol_constants::CONNECTION_OUTBOUND_QUEUE_CAPACITY;
use crate::services::ingest_bus::IngestBus;
use crate::services::session_store::SessionConnectionStore;
use crate::state::Config;

/// Request to accept a new WebSocket connection, gathered from the
/// handshake's query parameters and the verified principal.
pub struct AcceptRequest {
    pub connection_id: String,
    pub session_id: String,
    pub target_language: Option<String>,
    pub user_id: String,
    pub authenticated: bool,
}

/// A connection was accepted as either role; callers use this to decide how
/// to label the accepted connection in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptedRole {
    Speaker,
    Listener,
}

/// Owns the per-connection outbound queues, the session/connection store,
/// the language validator, and the auth verifier. One instance per process.
pub struct Gateway {
    store: Arc<SessionConnectionStore>,
    language: Arc<LanguageValidator>,
    auth: Arc<AuthVerifier>,
    ingest: Arc<IngestBus>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    outboxes: DashMap<String, mpsc::Sender<OutboundFrame>>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        store: Arc<SessionConnectionStore>,
        language: Arc<LanguageValidator>,
        auth: Arc<AuthVerifier>,
        ingest: Arc<IngestBus>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            language,
            auth,
            ingest,
            clock,
            config,
            outboxes: DashMap::new(),
        }
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<AuthVerifier> {
        &self.auth
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionConnectionStore> {
        &self.store
    }

    #[must_use]
    pub fn language(&self) -> &Arc<LanguageValidator> {
        &self.language
    }

    #[must_use]
    pub fn ingest(&self) -> &Arc<IngestBus> {
        &self.ingest
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Allocates a fresh session-scoped ID against the store's collision
    /// check, per component A.
    pub fn new_session_id(&self) -> PipelineResult<String> {
        crate::ids::new_id(|id| self.store.get_session(id).is_some())
    }

    /// Creates a new active session owned by `owner_id` (empty for an
    /// anonymous speaker), with `expiresAt` set `session_ttl_secs` out from
    /// now per §9's TTL resolution.
    #[must_use]
    pub fn create_session(
        &self,
        session_id: String,
        owner_id: String,
        source_language: String,
        configured_targets: Vec<String>,
    ) -> crate::model::Session {
        let now = self.clock.now_millis();
        let session = crate::model::Session {
            session_id,
            owner_id,
            source_language,
            configured_targets,
            status: crate::model::SessionStatus::Active,
            created_at: now,
            last_activity_at: now,
            expires_at: now + self.config.session_ttl_secs * 1000,
        };
        self.store.put_session(session.clone());
        session
    }

    fn connection_expiry(&self, now: u64) -> u64 {
        now + self.config.connection_ttl_secs * 1000
    }

    /// Classifies and accepts a new connection per §4.E's deterministic rule.
    /// Returns the accepted connection's role and registers its outbound
    /// queue, or the `PipelineError` whose `close_code()` the caller should
    /// send back before closing the socket.
    pub async fn accept(
        &self,
        req: AcceptRequest,
    ) -> PipelineResult<(AcceptedRole, mpsc::Receiver<OutboundFrame>)> {
        let session = self
            .store
            .get_session(&req.session_id)
            .ok_or_else(|| PipelineError::NotFound(format!("session {} not found", req.session_id)))?;
        if !session.is_active() {
            return Err(PipelineError::NotFound(format!("session {} is not active", req.session_id)));
        }

        let is_listener = req.target_language.as_deref().is_some_and(|l| !l.is_empty());
        let role = if is_listener {
            AcceptedRole::Listener
        } else if req.authenticated && req.user_id == session.owner_id {
            AcceptedRole::Speaker
        } else {
            return Err(PipelineError::AuthzError(
                "connection is neither a listener nor the session owner".to_string(),
            ));
        };

        if role == AcceptedRole::Listener {
            let target = req.target_language.clone().unwrap_or_default();
            self.language
                .validate_pair(&session.source_language, &target)
                .map_err(|e| PipelineError::Validation(e.to_string()))?;
        }

        if role == AcceptedRole::Speaker {
            // I3: a new speaker connection evicts the prior one.
            if let Some(prior) = self.store.speaker_for_session(&req.session_id) {
                self.disconnect(&prior.connection_id).await;
            }
        }

        let now = self.clock.now_millis();
        let connection = Connection {
            connection_id: req.connection_id.clone(),
            session_id: req.session_id.clone(),
            role: match role {
                AcceptedRole::Speaker => Role::Speaker,
                AcceptedRole::Listener => Role::Listener,
            },
            target_language: req.target_language.clone(),
            user_id: req.user_id.clone(),
            connected_at: now,
            last_activity_at: now,
            expires_at: self.connection_expiry(now),
        };
        self.store.put_connection(connection)?;

        let (tx, rx) = mpsc::channel(CONNECTION_OUTBOUND_QUEUE_CAPACITY);
        self.outboxes.insert(req.connection_id.clone(), tx);

        Ok((role, rx))
    }

    /// Handles `{action:"joinSession", sessionId, targetLanguage}`. Idempotent
    /// per P4: re-sends `sessionJoined` if the connection already matches.
    pub async fn join_session(
        &self,
        connection_id: &str,
        session_id: &str,
        target_language: &str,
    ) -> PipelineResult<()> {
        if let Some(existing) = self.store.get_connection(connection_id) {
            if existing.session_id == session_id
                && existing.target_language.as_deref() == Some(target_language)
            {
                self.send_joined(connection_id, session_id).await;
                return Ok(());
            }
        }

        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| PipelineError::NotFound(format!("session {session_id} not found")))?;
        if !session.is_active() {
            return Err(PipelineError::NotFound(format!("session {session_id} is not active")));
        }
        self.language
            .validate_pair(&session.source_language, target_language)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;

        let now = self.clock.now_millis();
        let connection = Connection {
            connection_id: connection_id.to_string(),
            session_id: session_id.to_string(),
            role: Role::Listener,
            target_language: Some(target_language.to_string()),
            user_id: String::new(),
            connected_at: now,
            last_activity_at: now,
            expires_at: self.connection_expiry(now),
        };
        self.store.put_connection(connection)?;
        self.send_joined(connection_id, session_id).await;
        Ok(())
    }

    async fn send_joined(&self, connection_id: &str, session_id: &str) {
        let frame = OutboundFrame::SessionJoined {
            session_id: session_id.to_string(),
            connection_id: connection_id.to_string(),
            server_time: self.clock.now_millis(),
        };
        self.notify(std::slice::from_ref(&connection_id.to_string()), frame).await;
    }

    /// Handles `{action:"audioChunk", ...}`. Speaker-only; errors never close
    /// the connection, they return an `audioChunkError` frame instead.
    pub async fn audio_chunk(
        &self,
        connection_id: &str,
        session_id: &str,
        audio_data_b64: &str,
        timestamp: u64,
        sample_rate: u32,
        channels: u16,
        encoding: &str,
    ) {
        use base64::Engine;

        let Some(conn) = self.store.get_connection(connection_id) else {
            self.send_audio_chunk_error(connection_id, "unknown connection").await;
            return;
        };
        if !conn.is_speaker() {
            self.send_audio_chunk_error(connection_id, "only the speaker may send audioChunk").await;
            return;
        }

        match base64::engine::general_purpose::STANDARD.decode(audio_data_b64) {
            Ok(pcm) => {
                self.ingest
                    .append(session_id, bytes::Bytes::from(pcm), timestamp, sample_rate, channels, encoding);
            }
            Err(e) => {
                self.send_audio_chunk_error(connection_id, &format!("invalid base64: {e}")).await;
            }
        }
    }

    async fn send_audio_chunk_error(&self, connection_id: &str, reason: &str) {
        let frame = OutboundFrame::AudioChunkError { reason: reason.to_string() };
        self.notify(std::slice::from_ref(&connection_id.to_string()), frame).await;
    }

    /// Handles an unrecognized inbound action: replies with `protocolError`
    /// and leaves the connection open.
    pub async fn protocol_error(&self, connection_id: &str, message: &str) {
        let frame = OutboundFrame::ProtocolError { message: message.to_string() };
        self.notify(std::slice::from_ref(&connection_id.to_string()), frame).await;
    }

    /// Disconnect / `leave` / transport-close path. Idempotent: disconnecting
    /// an already-gone connection is a no-op. If the connection was the
    /// session's speaker, ends the session and notifies remaining listeners.
    pub async fn disconnect(&self, connection_id: &str) {
        let Some(removed) = self.store.delete_connection(connection_id) else {
            self.outboxes.remove(connection_id);
            return;
        };
        self.outboxes.remove(connection_id);

        if removed.is_speaker() {
            self.ingest.cancel_session(&removed.session_id);
            if let Some(remaining) = self.store.end_session(&removed.session_id) {
                let remaining: Vec<String> = remaining
                    .into_iter()
                    .filter(|id| id != connection_id)
                    .collect();
                if !remaining.is_empty() {
                    let frame = OutboundFrame::SessionEnded {
                        session_id: removed.session_id.clone(),
                        reason: "speaker_disconnected".to_string(),
                    };
                    self.notify(&remaining, frame).await;
                }
                for id in self.store.connections_for_session(&removed.session_id) {
                    self.store.delete_connection(&id.connection_id);
                    self.outboxes.remove(&id.connection_id);
                }
            }
        }
    }

    /// Periodic TTL reaper (§9's resolved open question: session and
    /// connection TTLs are independent; the earlier of the two controls a
    /// given listener). Evicts any connection whose own `expiresAt` has
    /// passed via the ordinary disconnect path (so a speaker-connection
    /// expiry still ends the session and notifies remaining listeners),
    /// then separately ends any session whose own TTL elapsed — which
    /// reaps every connection still attached to it (listener TTLs longer
    /// than their session's are cut short by the session ending first).
    pub async fn reap_expired(&self) {
        let now = self.clock.now_millis();

        let expired_connections: Vec<String> = self
            .store
            .all_connections()
            .into_iter()
            .filter(|conn| conn.expires_at < now)
            .map(|conn| conn.connection_id)
            .collect();
        for connection_id in expired_connections {
            tracing::debug!(%connection_id, "reaper: evicting expired connection");
            self.disconnect(&connection_id).await;
        }

        let expired_sessions: Vec<String> = self
            .store
            .all_sessions()
            .into_iter()
            .filter(|s| s.is_active() && s.expires_at < now)
            .map(|s| s.session_id)
            .collect();
        for session_id in expired_sessions {
            tracing::debug!(%session_id, "reaper: session ttl expired");
            self.ingest.cancel_session(&session_id);
            if let Some(remaining) = self.store.end_session(&session_id) {
                if !remaining.is_empty() {
                    let frame = OutboundFrame::SessionEnded {
                        session_id: session_id.clone(),
                        reason: "ttl_expired".to_string(),
                    };
                    self.notify(&remaining, frame).await;
                }
                for conn in self.store.connections_for_session(&session_id) {
                    self.store.delete_connection(&conn.connection_id);
                    self.outboxes.remove(&conn.connection_id);
                }
            }
        }
    }
}

#[async_trait]
impl Notifier for Gateway {
    /// Fans `frame` out to every listed connection, one bounded-deadline send
    /// per connection, run concurrently. A send that fails or times out
    /// marks that connection gone and reaps it from the store; it never
    /// fails the call as a whole.
    async fn notify(&self, connection_ids: &[String], frame: OutboundFrame) {
        let sends = connection_ids.iter().map(|id| {
            let frame = frame.clone();
            async move {
                let Some(tx) = self.outboxes.get(id).map(|r| r.value().clone()) else {
                    return;
                };
                let deadline = Duration::from_secs(self.config.notify_timeout_secs);
                match tokio::time::timeout(deadline, tx.send(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => {
                        tracing::debug!(connection_id = %id, "notify: connection gone, reaping");
                        self.store.delete_connection(id);
                        self.outboxes.remove(id);
                    }
                }
            }
        });
        futures::future::join_all(sends).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthVerifier, StaticJwksSource};
    use crate::clock::FakeClock;
    use crate::language::{LanguageValidator, StaticCapabilityOracle};
    use crate::model::{Session, SessionStatus};
    use crate::services::ingest_bus::{IngestBus, IngestBusConfig};

    fn make_gateway() -> (Gateway, mpsc::Receiver<crate::model::AudioBatch>) {
        let store = Arc::new(SessionConnectionStore::new());
        let language = Arc::new(LanguageValidator::new());
        let auth = Arc::new(AuthVerifier::new(Arc::new(StaticJwksSource { keys: None }), "aud"));
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
        let (tx, rx) = mpsc::channel(16);
        let ingest = Arc::new(IngestBus::new(IngestBusConfig::default(), clock.clone(), tx));
        let config = Arc::new(Config::default());
        (Gateway::new(store, language, auth, ingest, clock, config), rx)
    }

    async fn seed_session(gw: &Gateway, session_id: &str, owner: &str) {
        gw.language
            .refresh(&StaticCapabilityOracle {
                sources: Some(["en".to_string()].into_iter().collect()),
                targets: Some(["fr".to_string(), "es".to_string()].into_iter().collect()),
            })
            .await;
        gw.store.put_session(Session {
            session_id: session_id.to_string(),
            owner_id: owner.to_string(),
            source_language: "en".to_string(),
            configured_targets: vec!["fr".to_string()],
            status: SessionStatus::Active,
            created_at: 0,
            last_activity_at: 0,
            expires_at: u64::MAX,
        });
    }

    #[tokio::test]
    async fn accept_classifies_listener_when_target_language_present() {
        let (gw, _rx) = make_gateway();
        seed_session(&gw, "sess-1", "owner-1").await;

        let (role, _) = gw
            .accept(AcceptRequest {
                connection_id: "c1".into(),
                session_id: "sess-1".into(),
                target_language: Some("fr".into()),
                user_id: String::new(),
                authenticated: false,
            })
            .await
            .unwrap();
        assert_eq!(role, AcceptedRole::Listener);
    }

    #[tokio::test]
    async fn accept_rejects_unauthenticated_non_listener() {
        let (gw, _rx) = make_gateway();
        seed_session(&gw, "sess-1", "owner-1").await;

        let result = gw
            .accept(AcceptRequest {
                connection_id: "c1".into(),
                session_id: "sess-1".into(),
                target_language: None,
                user_id: String::new(),
                authenticated: false,
            })
            .await;
        assert!(matches!(result, Err(PipelineError::AuthzError(_))));
    }

    #[tokio::test]
    async fn accept_rejects_unknown_session_as_not_found() {
        let (gw, _rx) = make_gateway();
        let result = gw
            .accept(AcceptRequest {
                connection_id: "c1".into(),
                session_id: "missing".into(),
                target_language: Some("fr".into()),
                user_id: String::new(),
                authenticated: false,
            })
            .await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[tokio::test]
    async fn join_session_is_idempotent() {
        let (gw, _rx) = make_gateway();
        seed_session(&gw, "sess-1", "owner-1").await;
        let (_, mut out_rx) = gw
            .accept(AcceptRequest {
                connection_id: "c1".into(),
                session_id: "sess-1".into(),
                target_language: Some("fr".into()),
                user_id: String::new(),
                authenticated: false,
            })
            .await
            .unwrap();

        gw.join_session("c1", "sess-1", "fr").await.unwrap();
        gw.join_session("c1", "sess-1", "fr").await.unwrap();

        let mut joined_count = 0;
        while let Ok(frame) = out_rx.try_recv() {
            if matches!(frame, OutboundFrame::SessionJoined { .. }) {
                joined_count += 1;
            }
        }
        assert_eq!(joined_count, 2);
        assert_eq!(gw.store.list_listener_languages("sess-1").len(), 1);
    }

    #[tokio::test]
    async fn speaker_disconnect_ends_session_and_notifies_listeners() {
        let (gw, _rx) = make_gateway();
        seed_session(&gw, "sess-1", "owner-1").await;
        let (_, _speaker_rx) = gw
            .accept(AcceptRequest {
                connection_id: "speaker".into(),
                session_id: "sess-1".into(),
                target_language: None,
                user_id: "owner-1".into(),
                authenticated: true,
            })
            .await
            .unwrap();
        let (_, mut listener_rx) = gw
            .accept(AcceptRequest {
                connection_id: "listener".into(),
                session_id: "sess-1".into(),
                target_language: Some("fr".into()),
                user_id: String::new(),
                authenticated: false,
            })
            .await
            .unwrap();

        gw.disconnect("speaker").await;

        let frame = listener_rx.recv().await.unwrap();
        assert!(matches!(frame, OutboundFrame::SessionEnded { .. }));
        assert_eq!(gw.store.get_session("sess-1").unwrap().status, SessionStatus::Ended);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (gw, _rx) = make_gateway();
        seed_session(&gw, "sess-1", "owner-1").await;
        gw.accept(AcceptRequest {
            connection_id: "c1".into(),
            session_id: "sess-1".into(),
            target_language: Some("fr".into()),
            user_id: String::new(),
            authenticated: false,
        })
        .await
        .unwrap();

        gw.disconnect("c1").await;
        gw.disconnect("c1").await;
        assert!(gw.store.get_connection("c1").is_none());
    }

    #[tokio::test]
    async fn create_session_sets_ttl_from_config() {
        let (gw, _rx) = make_gateway();
        let session = gw.create_session(
            "sess-new".into(),
            "owner-1".into(),
            "en".into(),
            vec!["fr".into()],
        );
        assert_eq!(session.expires_at, 1_000 + Config::default().session_ttl_secs * 1000);
        assert!(gw.store.get_session("sess-new").is_some());
    }

    #[tokio::test]
    async fn reap_expired_evicts_connection_past_its_own_ttl() {
        let (gw, _rx) = make_gateway();
        seed_session(&gw, "sess-1", "owner-1").await;
        gw.store.put_connection(Connection {
            connection_id: "c1".into(),
            session_id: "sess-1".into(),
            role: Role::Listener,
            target_language: Some("fr".into()),
            user_id: String::new(),
            connected_at: 0,
            last_activity_at: 0,
            expires_at: 500,
        })
        .unwrap();

        gw.reap_expired().await;
        assert!(gw.store.get_connection("c1").is_none());
    }

    #[tokio::test]
    async fn reap_expired_ends_session_past_its_own_ttl_even_with_live_listener() {
        let (gw, _rx) = make_gateway();
        gw.language
            .refresh(&StaticCapabilityOracle {
                sources: Some(["en".to_string()].into_iter().collect()),
                targets: Some(["fr".to_string()].into_iter().collect()),
            })
            .await;
        gw.store.put_session(Session {
            session_id: "sess-1".into(),
            owner_id: "owner-1".into(),
            source_language: "en".into(),
            configured_targets: vec!["fr".into()],
            status: SessionStatus::Active,
            created_at: 0,
            last_activity_at: 0,
            expires_at: 500,
        });
        let (_, mut listener_rx) = gw
            .accept(AcceptRequest {
                connection_id: "listener".into(),
                session_id: "sess-1".into(),
                target_language: Some("fr".into()),
                user_id: String::new(),
                authenticated: false,
            })
            .await
            .unwrap();
        gw.store.update_session("sess-1", |s| s.expires_at = 500);

        gw.reap_expired().await;

        let frame = listener_rx.recv().await.unwrap();
        assert!(matches!(frame, OutboundFrame::SessionEnded { .. }));
        assert_eq!(gw.store.get_session("sess-1").unwrap().status, SessionStatus::Ended);
        assert!(gw.store.get_connection("listener").is_none());
    }

    #[tokio::test]
    async fn accepted_connection_expiry_reflects_configured_ttl() {
        let (gw, _rx) = make_gateway();
        seed_session(&gw, "sess-1", "owner-1").await;
        gw.accept(AcceptRequest {
            connection_id: "c1".into(),
            session_id: "sess-1".into(),
            target_language: Some("fr".into()),
            user_id: String::new(),
            authenticated: false,
        })
        .await
        .unwrap();
        let conn = gw.store.get_connection("c1").unwrap();
        assert_eq!(conn.expires_at, 1_000 + Config::default().connection_ttl_secs * 1000);
    }
}

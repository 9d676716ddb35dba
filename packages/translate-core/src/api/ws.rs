//! WebSocket handler for the translation-pipeline control plane (component E).

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::Deserialize;

use crate::api::AppState;
use crate::ids::new_id;
use crate::protocol_constants::CLOSE_NORMAL;
use crate::services::gateway::AcceptRequest;

/// Handshake query parameters (§6): `token` optional, `sessionId` required,
/// `targetLanguage` required iff the connection turns out to be a listener.
#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    pub token: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "targetLanguage")]
    pub target_language: Option<String>,
}

/// Tagged inbound action (§6's inbound schemas).
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum WsIncoming {
    JoinSession {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "targetLanguage")]
        target_language: String,
    },
    AudioChunk {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "audioData")]
        audio_data: String,
        timestamp: u64,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        channels: u16,
        encoding: String,
    },
    Leave,
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection guard (RAII cleanup)
// ─────────────────────────────────────────────────────────────────────────────

/// Ensures `Gateway::disconnect` runs exactly once per connection, even if
/// the handler task panics or exits through an early `break` from the
/// select loop. `Gateway::disconnect` is itself idempotent, but the guard
/// still only fires it the one time the task actually ends.
struct ConnectionGuard {
    connection_id: String,
    gateway: std::sync::Arc<crate::services::Gateway>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let connection_id = self.connection_id.clone();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            gateway.disconnect(&connection_id).await;
        });
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state, params))
}

/// Accepts the handshake, then drives the per-connection read/write loop
/// until the socket closes, `leave` is received, or the heartbeat times out.
async fn handle_ws(socket: WebSocket, state: AppState, params: HandshakeParams) {
    let (mut sender, mut receiver) = socket.split();

    let principal = state.gateway.auth().verify(params.token.as_deref(), now_millis()).await;
    let connection_id = match new_id(|id| state.store.get_connection(id).is_some()) {
        Ok(id) => id,
        Err(e) => {
            let _ = sender
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: 1011,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let accept_result = state
        .gateway
        .accept(AcceptRequest {
            connection_id: connection_id.clone(),
            session_id: params.session_id.clone(),
            target_language: params.target_language.clone(),
            user_id: principal.user_id.clone(),
            authenticated: principal.authenticated,
        })
        .await;

    let mut outbound_rx = match accept_result {
        Ok((_, rx)) => rx,
        Err(err) => {
            let _ = sender
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: err.close_code(),
                    reason: err.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let guard = ConnectionGuard {
        connection_id: connection_id.clone(),
        gateway: state.gateway.clone(),
    };

    let heartbeat_timeout = Duration::from_secs(state.config.ws_heartbeat_timeout_secs);
    let mut last_activity = Instant::now();
    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(state.config.ws_heartbeat_check_interval_secs.max(1)));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_inbound(&state, &connection_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(Message::Binary(_))) => {
                        state.gateway.protocol_error(&connection_id, "binary frames are not accepted").await;
                    }
                    _ => {}
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Ok(json) = serde_json::to_string(&frame) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > heartbeat_timeout {
                    tracing::debug!(%connection_id, "heartbeat timeout, closing connection");
                    let _ = sender
                        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                            code: CLOSE_NORMAL,
                            reason: "heartbeat timeout".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    }

    drop(guard);
}

async fn dispatch_inbound(state: &AppState, connection_id: &str, text: &str) {
    match serde_json::from_str::<WsIncoming>(text) {
        Ok(WsIncoming::JoinSession { session_id, target_language }) => {
            if let Err(e) = state.gateway.join_session(connection_id, &session_id, &target_language).await {
                state.gateway.protocol_error(connection_id, &e.to_string()).await;
            }
        }
        Ok(WsIncoming::AudioChunk {
            session_id,
            audio_data,
            timestamp,
            sample_rate,
            channels,
            encoding,
        }) => {
            state
                .gateway
                .audio_chunk(connection_id, &session_id, &audio_data, timestamp, sample_rate, channels, &encoding)
                .await;
        }
        Ok(WsIncoming::Leave) => {
            state.gateway.disconnect(connection_id).await;
        }
        Err(e) => {
            state.gateway.protocol_error(connection_id, &format!("unrecognized action: {e}")).await;
        }
    }
}

fn now_millis() -> u64 {
    crate::utils::now_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_session_parses_camel_case_action() {
        let json = r#"{"action":"joinSession","sessionId":"sess-1","targetLanguage":"fr"}"#;
        let parsed: WsIncoming = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, WsIncoming::JoinSession { .. }));
    }

    #[test]
    fn leave_parses_with_no_payload() {
        let json = r#"{"action":"leave"}"#;
        let parsed: WsIncoming = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, WsIncoming::Leave));
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let json = r#"{"action":"setVolume","level":5}"#;
        let result: Result<WsIncoming, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}

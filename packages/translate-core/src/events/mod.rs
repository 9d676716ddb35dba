//! Outbound wire frames and the [`Notifier`] seam that breaks the cyclic
//! reference between the worker pool and the gateway (§9 design notes): the
//! worker depends on `Notifier`, never on the gateway's connection registry
//! directly.

mod notifier;

pub use notifier::{LoggingNotifier, Notifier};

use serde::Serialize;

/// The four outbound message schemas (§6). Tagged on `type` to match the
/// wire contract exactly.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundFrame {
    SessionJoined {
        session_id: String,
        connection_id: String,
        server_time: u64,
    },
    TranslatedAudio {
        session_id: String,
        target_language: String,
        url: String,
        timestamp: u64,
        duration: u64,
        transcript: String,
        sequence_number: u64,
    },
    SessionEnded {
        session_id: String,
        reason: String,
    },
    Error {
        code: &'static str,
        message: String,
    },
    /// Not in §6's outbound list but needed to answer an unrecognized
    /// inbound action without closing the connection (§4.E "any other
    /// action"). Distinct from `Error` so clients can tell a best-effort
    /// notice apart from a hard error.
    ProtocolError {
        message: String,
    },
    AudioChunkError {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translated_audio_serializes_with_camel_case_tag() {
        let frame = OutboundFrame::TranslatedAudio {
            session_id: "sess-1".into(),
            target_language: "fr".into(),
            url: "https://blob/x".into(),
            timestamp: 1000,
            duration: 3000,
            transcript: "hello".into(),
            sequence_number: 1000,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"translatedAudio\""));
        assert!(json.contains("\"targetLanguage\":\"fr\""));
    }
}

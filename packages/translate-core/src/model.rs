//! Core data model: [`Session`], [`Connection`], [`AudioBatch`], and the
//! deterministic blob key for a translated chunk.

use serde::{Deserialize, Serialize};

/// Role of a [`Connection`] within its [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Speaker,
    Listener,
}

/// Lifecycle status of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// A logical broadcast scope owned by one speaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    /// Speaker identity; empty for anonymous speaker sessions.
    pub owner_id: String,
    pub source_language: String,
    /// Advisory; the actual translation set is derived from live listeners.
    pub configured_targets: Vec<String>,
    pub status: SessionStatus,
    pub created_at: u64,
    pub last_activity_at: u64,
    pub expires_at: u64,
}

impl Session {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// One live bidirectional WebSocket peer bound to one [`Session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub connection_id: String,
    pub session_id: String,
    pub role: Role,
    /// Required iff `role == Listener`; `None` for a speaker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    /// Empty for anonymous principals.
    pub user_id: String,
    pub connected_at: u64,
    pub last_activity_at: u64,
    pub expires_at: u64,
}

impl Connection {
    #[must_use]
    pub fn is_listener(&self) -> bool {
        self.role == Role::Listener
    }

    #[must_use]
    pub fn is_speaker(&self) -> bool {
        self.role == Role::Speaker
    }
}

/// A window of PCM frames from one session, released together to the
/// worker pool. Never persisted; destroyed once every per-language output
/// for it has been emitted.
#[derive(Debug, Clone)]
pub struct AudioBatch {
    pub session_id: String,
    pub frames: Vec<bytes::Bytes>,
    pub first_frame_time: u64,
    pub last_frame_time: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: String,
}

impl AudioBatch {
    /// Concatenates `frames` into a single raw PCM buffer. Valid because
    /// frames are headerless PCM sharing the same format.
    #[must_use]
    pub fn concatenated_pcm(&self) -> Vec<u8> {
        let total_len: usize = self.frames.iter().map(|f| f.len()).sum();
        let mut out = Vec::with_capacity(total_len);
        for frame in &self.frames {
            out.extend_from_slice(frame);
        }
        out
    }

    /// The per-session monotonic sequence number used to order playback:
    /// equal to the batch's first-frame timestamp.
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.first_frame_time
    }
}

/// Builds the deterministic blob-store key for a translated chunk:
/// `sessions/{sessionId}/translated/{lang}/{timestampMillis}.mp3`.
#[must_use]
pub fn translated_chunk_key(session_id: &str, target_language: &str, timestamp_millis: u64) -> String {
    format!("sessions/{session_id}/translated/{target_language}/{timestamp_millis}.mp3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translated_chunk_key_is_deterministic() {
        let a = translated_chunk_key("sess-1", "fr", 1000);
        let b = translated_chunk_key("sess-1", "fr", 1000);
        assert_eq!(a, b);
        assert_eq!(a, "sessions/sess-1/translated/fr/1000.mp3");
    }

    #[test]
    fn concatenated_pcm_preserves_order() {
        let batch = AudioBatch {
            session_id: "s".into(),
            frames: vec![bytes::Bytes::from_static(&[1, 2]), bytes::Bytes::from_static(&[3, 4])],
            first_frame_time: 10,
            last_frame_time: 20,
            sample_rate: 16_000,
            channels: 1,
            encoding: "pcm_s16le".into(),
        };
        assert_eq!(batch.concatenated_pcm(), vec![1, 2, 3, 4]);
        assert_eq!(batch.sequence_number(), 10);
    }
}

//! Abstract external collaborators (§6): streaming STT, text translation,
//! text-to-speech synthesis, and the blob store's write/presign pair.
//!
//! Each port is a trait so the worker pool and supervisor depend on a
//! capability, not a concrete cloud SDK. Every trait ships one in-memory
//! fake alongside it for tests, matching this crate's existing
//! [`crate::language::CapabilityOracle`] / [`crate::clock::Clock`] pattern of
//! "one in-memory implementation, no mocking framework".

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Transcript produced by a completed streaming STT call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SttError {
    #[error("stt failed: {0}")]
    Failed(String),
}

impl From<SttError> for crate::error::PipelineError {
    fn from(e: SttError) -> Self {
        crate::error::PipelineError::UpstreamTimeout { stage: "stt", detail: e.to_string() }
    }
}

/// Streaming speech-to-text port. The worker feeds PCM in chunks no larger
/// than [`Self::max_feed_chunk_bytes`] and then asks for the final transcript.
#[async_trait]
pub trait Stt: Send + Sync {
    /// Maximum size, in bytes, of a single `feed` call this port accepts.
    fn max_feed_chunk_bytes(&self) -> usize;

    /// Transcribes a complete PCM buffer for one batch. Implementations that
    /// wrap a truly streaming upstream API internally split `pcm` into
    /// `max_feed_chunk_bytes`-sized pieces before finalizing.
    async fn transcribe(
        &self,
        pcm: &[u8],
        source_language: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Transcript, SttError>;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("translation failed: {0}")]
    Failed(String),
}

impl From<TranslateError> for crate::error::PipelineError {
    fn from(e: TranslateError) -> Self {
        crate::error::PipelineError::UpstreamTimeout { stage: "translate", detail: e.to_string() }
    }
}

/// Per-language text translation port.
#[async_trait]
pub trait Translate: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, TranslateError>;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SynthesizeError {
    #[error("synthesis failed: {0}")]
    Failed(String),
}

impl From<SynthesizeError> for crate::error::PipelineError {
    fn from(e: SynthesizeError) -> Self {
        crate::error::PipelineError::UpstreamTimeout { stage: "synthesize", detail: e.to_string() }
    }
}

/// Synthesized audio and its metadata.
#[derive(Debug, Clone)]
pub struct Synthesized {
    pub bytes: bytes::Bytes,
    pub content_type: String,
    pub duration_millis: u64,
}

/// Text-to-speech port.
#[async_trait]
pub trait Synthesize: Send + Sync {
    async fn synthesize(&self, text: &str, target_language: &str) -> Result<Synthesized, SynthesizeError>;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BlobStoreError {
    #[error("blob store failed: {0}")]
    Failed(String),
}

impl From<BlobStoreError> for crate::error::PipelineError {
    fn from(e: BlobStoreError) -> Self {
        crate::error::PipelineError::UpstreamTimeout { stage: "blob_store", detail: e.to_string() }
    }
}

/// Object storage for synthesized audio chunks (component H).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `bytes` to `key`, tagging the object with the retention
    /// metadata requested by the caller (§3, ≤24h).
    async fn put(
        &self,
        key: &str,
        bytes: bytes::Bytes,
        content_type: &str,
        metadata: &[(&str, &str)],
    ) -> Result<(), BlobStoreError>;

    /// Issues a time-limited fetch URL for `key`, valid for `ttl`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, BlobStoreError>;
}

/// Generates a short silent placeholder in place of a failed synthesis call
/// (§4.G step 5), so listener playback does not stall. Tagged with a fixed
/// content type distinct from real synthesized audio so it is identifiable
/// in logs and, if ever inspected, in storage.
#[must_use]
pub fn silent_placeholder(duration_millis: u64) -> Synthesized {
    Synthesized {
        bytes: bytes::Bytes::from_static(&[0u8; 64]),
        content_type: "audio/x-silent-placeholder".to_string(),
        duration_millis,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory fakes for tests
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic fake STT: echoes a fixed transcript, or fails when
/// `fail_on` matches the source language (to exercise the failure path).
pub struct FakeStt {
    pub transcript: String,
    pub fail_on: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeStt {
    #[must_use]
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stt for FakeStt {
    fn max_feed_chunk_bytes(&self) -> usize {
        crate::protocol_constants::STT_MAX_FEED_CHUNK_BYTES
    }

    async fn transcribe(
        &self,
        _pcm: &[u8],
        source_language: &str,
        _sample_rate: u32,
        _channels: u16,
    ) -> Result<Transcript, SttError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.as_deref() == Some(source_language) {
            return Err(SttError::Failed(format!("no upstream support for {source_language}")));
        }
        Ok(Transcript {
            text: self.transcript.clone(),
        })
    }
}

/// Fake translator: tags the source text with the target language unless
/// `target_language` is in `fail_on`.
pub struct FakeTranslate {
    pub fail_on: Vec<String>,
    pub calls: AtomicUsize,
}

impl FakeTranslate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_on: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeTranslate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Translate for FakeTranslate {
    async fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
    ) -> Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.iter().any(|l| l == target_language) {
            return Err(TranslateError::Failed(format!("no route to {target_language}")));
        }
        Ok(format!("[{target_language}] {text}"))
    }
}

/// Fake TTS: returns a fixed-size buffer tagged with the target language.
/// `fail_on` simulates an upstream outage so the placeholder fallback path
/// can be exercised.
pub struct FakeSynthesize {
    pub bytes_len: usize,
    pub fail_on: Vec<String>,
    pub calls: AtomicUsize,
}

impl FakeSynthesize {
    #[must_use]
    pub fn new(bytes_len: usize) -> Self {
        Self {
            bytes_len,
            fail_on: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesize for FakeSynthesize {
    async fn synthesize(&self, _text: &str, target_language: &str) -> Result<Synthesized, SynthesizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.iter().any(|l| l == target_language) {
            return Err(SynthesizeError::Failed(format!("no voice for {target_language}")));
        }
        Ok(Synthesized {
            bytes: bytes::Bytes::from(vec![0u8; self.bytes_len]),
            content_type: "audio/mpeg".to_string(),
            duration_millis: 3000,
        })
    }
}

/// In-memory blob store: keeps every written object in a map, keyed exactly
/// as the caller asked (so re-writes to a deterministic key overwrite it,
/// matching the at-least-once idempotency requirement).
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<std::collections::HashMap<String, bytes::Bytes>>,
}

impl InMemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<bytes::Bytes> {
        self.objects.lock().get(key).cloned()
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: bytes::Bytes,
        _content_type: &str,
        _metadata: &[(&str, &str)],
    ) -> Result<(), BlobStoreError> {
        self.objects.lock().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, BlobStoreError> {
        if !self.objects.lock().contains_key(key) {
            return Err(BlobStoreError::Failed(format!("no such object: {key}")));
        }
        Ok(format!("https://blob.local/{key}?ttl={}", ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_stt_transcribes() {
        let stt = FakeStt::new("hello");
        let out = stt.transcribe(b"\x00\x01", "en", 16_000, 1).await.unwrap();
        assert_eq!(out.text, "hello");
        assert_eq!(stt.call_count(), 1);
    }

    #[tokio::test]
    async fn fake_stt_fails_on_configured_language() {
        let mut stt = FakeStt::new("hello");
        stt.fail_on = Some("de".to_string());
        assert!(stt.transcribe(b"", "de", 16_000, 1).await.is_err());
    }

    #[tokio::test]
    async fn in_memory_blob_store_roundtrips() {
        let store = InMemoryBlobStore::new();
        store
            .put("sessions/s1/translated/fr/1.mp3", bytes::Bytes::from_static(b"abc"), "audio/mpeg", &[])
            .await
            .unwrap();
        let url = store
            .presign_get("sessions/s1/translated/fr/1.mp3", Duration::from_secs(600))
            .await
            .unwrap();
        assert!(url.contains("ttl=600"));
        assert_eq!(store.get("sessions/s1/translated/fr/1.mp3").unwrap(), bytes::Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn presign_rejects_unknown_key() {
        let store = InMemoryBlobStore::new();
        assert!(store.presign_get("missing", Duration::from_secs(1)).await.is_err());
    }
}

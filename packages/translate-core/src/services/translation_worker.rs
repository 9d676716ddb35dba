//! Translation worker pool (component G).
//!
//! Consumes `AudioBatch`es released by the ingest bus, runs STT once and
//! then fans out translate -> synthesize -> persist -> notify per target
//! language concurrently. STT is strictly before the per-target stage;
//! per-target stages never block each other (a failure in one target's
//! pipeline does not affect another's).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::error::{with_timeout, PipelineResult};
use crate::events::{Notifier, OutboundFrame};
use crate::model::{translated_chunk_key, AudioBatch};
use crate::ports::{BlobStore, Stt, Synthesize, Translate};
use crate::services::session_store::SessionConnectionStore;
use crate::state::Config;

/// Runtime counters exposed on the `/ready` admin surface.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub batches_dropped_no_listeners: AtomicU64,
    pub batches_processed: AtomicU64,
    pub stt_failures: AtomicU64,
}

/// Shared dependencies for every worker in the pool. Cheap to clone (all
/// fields are `Arc`s), so each spawned worker task owns one.
#[derive(Clone)]
pub struct TranslationWorkerPool {
    store: Arc<SessionConnectionStore>,
    stt: Arc<dyn Stt>,
    translate: Arc<dyn Translate>,
    synthesize: Arc<dyn Synthesize>,
    blob_store: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    stats: Arc<WorkerStats>,
}

impl TranslationWorkerPool {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionConnectionStore>,
        stt: Arc<dyn Stt>,
        translate: Arc<dyn Translate>,
        synthesize: Arc<dyn Synthesize>,
        blob_store: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            stt,
            translate,
            synthesize,
            blob_store,
            notifier,
            clock,
            config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Spawns `worker_pool_size` tasks, each pulling batches from `rx` and
    /// processing them independently. Returns the join handles so the
    /// supervisor can await them during shutdown drain.
    pub fn spawn(&self, rx: mpsc::Receiver<AudioBatch>) -> Vec<tokio::task::JoinHandle<()>> {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pool_size = self.config.worker_pool_size.max(1);
        (0..pool_size)
            .map(|_| {
                let pool = self.clone();
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let batch = {
                            let mut guard = rx.lock().await;
                            guard.recv().await
                        };
                        match batch {
                            Some(batch) => pool.process_batch(batch).await,
                            None => break,
                        }
                    }
                })
            })
            .collect()
    }

    /// Processes one released batch end to end (§4.G steps 1-7).
    pub async fn process_batch(&self, batch: AudioBatch) {
        let targets = self.store.list_listener_languages(&batch.session_id);
        if targets.is_empty() {
            self.stats.batches_dropped_no_listeners.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Some(session) = self.store.get_session(&batch.session_id) else {
            return;
        };

        // Step 2: record the cost-savings ratio of live listener languages
        // against the session's advisory configured set, so an operator can
        // see how much STT/MT/TTS spend the live-listener filter is avoiding.
        if !session.configured_targets.is_empty() {
            let configured = session.configured_targets.len();
            let live = targets.len();
            let skipped = configured.saturating_sub(live);
            tracing::info!(
                session_id = %batch.session_id,
                live_targets = live,
                configured_targets = configured,
                cost_savings_ratio = skipped as f64 / configured as f64,
                "worker: live listener languages vs. configured targets"
            );
        }

        let pcm = batch.concatenated_pcm();
        let transcript = match with_timeout(
            Duration::from_secs(self.config.stt_timeout_secs),
            "stt",
            self.stt.transcribe(&pcm, &session.source_language, batch.sample_rate, batch.channels),
        )
        .await
        {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::warn!(session_id = %batch.session_id, error = %e, "stt failed, dropping batch");
                self.stats.stt_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let sequence_number = batch.sequence_number();
        let duration_millis = batch.last_frame_time.saturating_sub(batch.first_frame_time);

        let pipelines = targets.into_iter().map(|target_language| {
            self.run_target_pipeline(
                batch.session_id.clone(),
                session.source_language.clone(),
                target_language,
                transcript.text.clone(),
                sequence_number,
                duration_millis,
            )
        });
        futures::future::join_all(pipelines).await;
        self.stats.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// translate -> synthesize -> persist -> notify for one target language.
    /// Isolated from sibling targets: a failure here never aborts another
    /// target's pipeline (they're driven concurrently via `join_all`).
    #[allow(clippy::too_many_arguments)]
    async fn run_target_pipeline(
        &self,
        session_id: String,
        source_language: String,
        target_language: String,
        transcript_text: String,
        sequence_number: u64,
        duration_millis: u64,
    ) {
        if let Err(e) = self
            .try_run_target_pipeline(
                &session_id,
                &source_language,
                &target_language,
                &transcript_text,
                sequence_number,
                duration_millis,
            )
            .await
        {
            tracing::warn!(%session_id, %target_language, error = %e, "target pipeline failed");
        }
    }

    async fn try_run_target_pipeline(
        &self,
        session_id: &str,
        source_language: &str,
        target_language: &str,
        transcript_text: &str,
        sequence_number: u64,
        duration_millis: u64,
    ) -> PipelineResult<()> {
        let translated = with_timeout(
            Duration::from_secs(self.config.translate_timeout_secs),
            "translate",
            self.translate.translate(transcript_text, source_language, target_language),
        )
        .await?;

        // Synthesis failure is recovered locally with a placeholder rather
        // than propagated with `?`, per §4.G step 5: a stalled TTS call must
        // not stall listener playback.
        let synthesized = match with_timeout(
            Duration::from_secs(self.config.synthesize_timeout_secs),
            "synthesize",
            self.synthesize.synthesize(&translated, target_language),
        )
        .await
        {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(
                    %session_id, %target_language, error = %e,
                    "synthesize failed, emitting silent placeholder"
                );
                crate::ports::silent_placeholder(duration_millis)
            }
        };

        let key = translated_chunk_key(session_id, target_language, sequence_number);
        with_timeout(
            Duration::from_secs(self.config.persist_timeout_secs),
            "blob_put",
            self.blob_store.put(
                &key,
                synthesized.bytes.clone(),
                &synthesized.content_type,
                &[("retention-hours", "24")],
            ),
        )
        .await?;

        let url = with_timeout(
            Duration::from_secs(self.config.persist_timeout_secs),
            "presign",
            self.blob_store.presign_get(&key, Duration::from_secs(self.config.presign_ttl_secs)),
        )
        .await?;

        let connection_ids = self.store.lookup_connections(session_id, target_language);
        if connection_ids.is_empty() {
            return Ok(());
        }
        let frame = OutboundFrame::TranslatedAudio {
            session_id: session_id.to_string(),
            target_language: target_language.to_string(),
            url,
            timestamp: sequence_number,
            duration: duration_millis,
            transcript: translated,
            sequence_number,
        };
        self.notifier.notify(&connection_ids, frame).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::events::LoggingNotifier;
    use crate::model::{Session, SessionStatus};
    use crate::ports::{FakeStt, FakeSynthesize, FakeTranslate, InMemoryBlobStore};

    fn make_batch(session_id: &str) -> AudioBatch {
        AudioBatch {
            session_id: session_id.to_string(),
            frames: vec![bytes::Bytes::from_static(&[0u8; 32])],
            first_frame_time: 5_000,
            last_frame_time: 8_000,
            sample_rate: 16_000,
            channels: 1,
            encoding: "pcm_s16le".to_string(),
        }
    }

    fn make_pool(
        store: Arc<SessionConnectionStore>,
        stt: Arc<dyn Stt>,
    ) -> (TranslationWorkerPool, Arc<FakeTranslate>, Arc<FakeSynthesize>, Arc<InMemoryBlobStore>) {
        let translate = Arc::new(FakeTranslate::new());
        let synthesize = Arc::new(FakeSynthesize::new(8192));
        let blob_store = Arc::new(InMemoryBlobStore::new());
        let pool = TranslationWorkerPool::new(
            store,
            stt,
            translate.clone() as Arc<dyn Translate>,
            synthesize.clone() as Arc<dyn Synthesize>,
            blob_store.clone() as Arc<dyn BlobStore>,
            Arc::new(LoggingNotifier),
            Arc::new(FakeClock::new(10_000)) as Arc<dyn Clock>,
            Arc::new(Config::default()),
        );
        (pool, translate, synthesize, blob_store)
    }

    #[tokio::test]
    async fn batch_with_no_listeners_is_dropped_before_any_upstream_call() {
        let store = Arc::new(SessionConnectionStore::new());
        store.put_session(Session {
            session_id: "sess-1".into(),
            owner_id: "owner".into(),
            source_language: "en".into(),
            configured_targets: vec!["fr".into()],
            status: SessionStatus::Active,
            created_at: 0,
            last_activity_at: 0,
            expires_at: u64::MAX,
        });
        let stt = Arc::new(FakeStt::new("hello"));
        let (pool, translate, synthesize, blob_store) = make_pool(store, stt.clone() as Arc<dyn Stt>);

        pool.process_batch(make_batch("sess-1")).await;

        assert_eq!(stt.call_count(), 0);
        assert_eq!(translate.call_count(), 0);
        assert_eq!(synthesize.call_count(), 0);
        assert_eq!(blob_store.object_count(), 0);
        assert_eq!(pool.stats().batches_dropped_no_listeners.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn single_listener_produces_one_stt_one_translate_one_synthesize() {
        use crate::model::{Connection, Role};

        let store = Arc::new(SessionConnectionStore::new());
        store.put_session(Session {
            session_id: "sess-1".into(),
            owner_id: "owner".into(),
            source_language: "en".into(),
            configured_targets: vec!["fr".into()],
            status: SessionStatus::Active,
            created_at: 0,
            last_activity_at: 0,
            expires_at: u64::MAX,
        });
        store
            .put_connection(Connection {
                connection_id: "listener-1".into(),
                session_id: "sess-1".into(),
                role: Role::Listener,
                target_language: Some("fr".into()),
                user_id: String::new(),
                connected_at: 0,
                last_activity_at: 0,
                expires_at: u64::MAX,
            })
            .unwrap();

        let stt = Arc::new(FakeStt::new("hello"));
        let (pool, translate, synthesize, blob_store) = make_pool(store, stt.clone() as Arc<dyn Stt>);

        pool.process_batch(make_batch("sess-1")).await;

        assert_eq!(stt.call_count(), 1);
        assert_eq!(translate.call_count(), 1);
        assert_eq!(synthesize.call_count(), 1);
        assert_eq!(blob_store.object_count(), 1);
        assert_eq!(pool.stats().batches_processed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn stt_failure_emits_nothing_and_counts_failure() {
        let store = Arc::new(SessionConnectionStore::new());
        store.put_session(Session {
            session_id: "sess-1".into(),
            owner_id: "owner".into(),
            source_language: "en".into(),
            configured_targets: vec!["fr".into()],
            status: SessionStatus::Active,
            created_at: 0,
            last_activity_at: 0,
            expires_at: u64::MAX,
        });
        use crate::model::{Connection, Role};
        store
            .put_connection(Connection {
                connection_id: "listener-1".into(),
                session_id: "sess-1".into(),
                role: Role::Listener,
                target_language: Some("fr".into()),
                user_id: String::new(),
                connected_at: 0,
                last_activity_at: 0,
                expires_at: u64::MAX,
            })
            .unwrap();

        let stt = Arc::new(FakeStt { transcript: "hello".into(), fail_on: Some("en".into()), calls: Default::default() });
        let (pool, translate, _synthesize, _blob_store) = make_pool(store, stt.clone() as Arc<dyn Stt>);

        pool.process_batch(make_batch("sess-1")).await;

        assert_eq!(translate.call_count(), 0);
        assert_eq!(pool.stats().stt_failures.load(Ordering::Relaxed), 1);
    }
}

//! The [`Notifier`] trait: the worker pool's only dependency on the gateway.

use async_trait::async_trait;

use super::OutboundFrame;

/// Delivers a single outbound frame to a set of connections, per §4.E's
/// fan-out contract: parallel across connections, ordered per connection.
/// Implementations record per-connection send failures and reap the
/// connection (gone detection) rather than surfacing the failure to the
/// caller — a `notify` call itself never fails.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, connection_ids: &[String], frame: OutboundFrame);
}

/// No-op notifier that only logs. Useful in worker-pool tests that assert on
/// the pipeline's STT/MT/TTS/blob calls without standing up a real gateway.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, connection_ids: &[String], frame: OutboundFrame) {
        tracing::debug!(?connection_ids, ?frame, "logging_notifier.notify");
    }
}

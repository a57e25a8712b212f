use async_trait::async_trait;

use crate::types::types::{ResponseInfo, TransferOutcome};

use super::sample::ProgressSample;

/// Trait for anything that wants to observe a transfer.
///
/// The engine's internal notifier calls these methods on all registered
/// observers, in event order.
///
/// Lifecycle:
/// - `on_response` is called once per session, when the response headers
///   are available and before the body read begins.
/// - `on_progress` is called for each throttled reading, in non-decreasing
///   byte-count order, ending with a forced final sample on success.
/// - `on_complete` is called exactly once per logical operation (success,
///   fault, or cancellation) and is always the last call for the session.
#[async_trait]
pub trait TransferObserver: Send + Sync + 'static {
    /// Called when the response headers are in.
    async fn on_response(&self, info: &ResponseInfo);

    /// Called with each throttled progress reading.
    async fn on_progress(&self, sample: &ProgressSample);

    /// Called with the terminal outcome.
    async fn on_complete(&self, outcome: &TransferOutcome);
}

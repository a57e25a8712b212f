use std::sync::Arc;

use tokio::sync::mpsc;

use crate::types::types::{ResponseInfo, TransferOutcome};

use super::observer::TransferObserver;
use super::sample::ProgressSample;

/// Everything a session reports while it runs. `Finished` is always the
/// last event on the channel; channel order is what makes the terminal
/// notification the last one observers see.
pub(crate) enum SessionEvent {
    Response(ResponseInfo),
    Progress(ProgressSample),
    Finished(TransferOutcome),
}

/// Drains the session event channel and fans out to all registered
/// observers.
///
/// | Channel message        | Observer method called            |
/// |------------------------|-----------------------------------|
/// | `Response(info)`       | `on_response(&info)`              |
/// | `Progress(sample)`     | `on_progress(&sample)`            |
/// | `Finished(outcome)`    | `on_complete(&outcome)` then stop |
pub(crate) struct CompletionNotifier {
    observers: Vec<Arc<dyn TransferObserver>>,
}

impl CompletionNotifier {
    pub(crate) fn new(observers: Vec<Arc<dyn TransferObserver>>) -> Self {
        Self { observers }
    }

    /// Consume events until the terminal one arrives or the channel closes.
    pub(crate) async fn run(self, mut events_rx: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events_rx.recv().await {
            match event {
                SessionEvent::Response(info) => {
                    for observer in &self.observers {
                        observer.on_response(&info).await;
                    }
                }
                SessionEvent::Progress(sample) => {
                    for observer in &self.observers {
                        observer.on_progress(&sample).await;
                    }
                }
                SessionEvent::Finished(outcome) => {
                    for observer in &self.observers {
                        observer.on_complete(&outcome).await;
                    }
                    return;
                }
            }
        }
        // All senders dropped without a terminal event: the session died
        // before finalizing. Nothing to dispatch.
        log::warn!("session event channel closed without a terminal event");
    }
}

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How a guarded wait ended.
pub(crate) enum WaitOutcome<T> {
    /// The wait finished before the deadline.
    Done(T),
    /// The deadline fired first; the in-flight operation was dropped.
    Stalled,
    /// The session's cancellation token fired first.
    Cancelled,
}

/// Per-wait stall guard.
///
/// Every individual suspension point of a session (awaiting the response
/// headers, awaiting each body chunk) runs under `guard`, so the deadline
/// is re-armed for each wait. A transfer that keeps making progress never
/// times out as a whole; only a single stalled wait does. Dropping the
/// guarded future is the abort, which makes cleanup idempotent.
pub(crate) struct TransferWatchdog {
    limit: Option<Duration>,
}

impl TransferWatchdog {
    /// `None` means no deadline: waits are only interruptible by cancel.
    pub(crate) fn new(limit: Option<Duration>) -> Self {
        Self { limit }
    }

    pub(crate) fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// Race one wait against the deadline and the cancellation token.
    pub(crate) async fn guard<F: Future>(
        &self,
        cancel: &CancellationToken,
        wait: F,
    ) -> WaitOutcome<F::Output> {
        tokio::pin!(wait);
        match self.limit {
            Some(limit) => tokio::select! {
                _ = cancel.cancelled() => WaitOutcome::Cancelled,
                finished = tokio::time::timeout(limit, &mut wait) => match finished {
                    Ok(value) => WaitOutcome::Done(value),
                    Err(_) => WaitOutcome::Stalled,
                },
            },
            None => tokio::select! {
                _ = cancel.cancelled() => WaitOutcome::Cancelled,
                value = &mut wait => WaitOutcome::Done(value),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_wait_completes() {
        let watchdog = TransferWatchdog::new(Some(Duration::from_secs(5)));
        let cancel = CancellationToken::new();
        match watchdog.guard(&cancel, async { 7 }).await {
            WaitOutcome::Done(value) => assert_eq!(value, 7),
            _ => panic!("ready future should complete"),
        }
    }

    #[tokio::test]
    async fn stalled_wait_times_out() {
        let watchdog = TransferWatchdog::new(Some(Duration::from_millis(20)));
        let cancel = CancellationToken::new();
        match watchdog.guard(&cancel, std::future::pending::<()>()).await {
            WaitOutcome::Stalled => {}
            _ => panic!("pending future should stall"),
        }
    }

    #[tokio::test]
    async fn cancel_beats_deadline() {
        let watchdog = TransferWatchdog::new(Some(Duration::from_secs(5)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        match watchdog.guard(&cancel, std::future::pending::<()>()).await {
            WaitOutcome::Cancelled => {}
            _ => panic!("cancelled token should win"),
        }
    }

    #[tokio::test]
    async fn no_limit_still_honors_cancel() {
        let watchdog = TransferWatchdog::new(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        match watchdog.guard(&cancel, std::future::pending::<()>()).await {
            WaitOutcome::Cancelled => {}
            _ => panic!("cancelled token should win without a deadline"),
        }
    }
}

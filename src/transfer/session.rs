use std::sync::Arc;

use futures::StreamExt;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::progress::notifier::SessionEvent;
use crate::progress::sample::format_bytes;
use crate::progress::tracker::ProgressTracker;
use crate::types::types::{ResponseInfo, TransferError, TransferOutcome, TransferPayload, TransferResult};

use super::engine::{EngineConfig, EngineCore, Phase};
use super::request;
use super::sink::Sink;
use super::watchdog::{TransferWatchdog, WaitOutcome};

/// One logical transfer from start to terminal notification, including the
/// one-time re-fetch the redirect workaround allows.
///
/// The session owns every in-flight resource: the HTTP client and response
/// stream, the sink, the tracker, and the watchdog. All of them are
/// released when `execute` returns, before the terminal event is sent.
pub(crate) struct TransferSession {
    id: String,
    address: String,
    token: String,
    config: EngineConfig,
    resume_offset: u64,
    sink: Box<dyn Sink>,
    tracker: ProgressTracker,
    watchdog: TransferWatchdog,
    cancel: CancellationToken,
    events_tx: mpsc::Sender<SessionEvent>,
    core: Arc<EngineCore>,
}

impl TransferSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        core: Arc<EngineCore>,
        config: EngineConfig,
        address: String,
        token: String,
        sink: Box<dyn Sink>,
        resume_offset: u64,
        cancel: CancellationToken,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            address,
            token,
            resume_offset,
            sink,
            tracker: ProgressTracker::new(resume_offset),
            watchdog: TransferWatchdog::new(config.timeout),
            cancel,
            events_tx,
            config,
            core,
        }
    }

    /// Run to completion and finalize exactly once. The phase claim in
    /// `EngineCore::try_finish` is the single `Busy -> terminal` transition;
    /// whichever path reaches it first wins and every later attempt is a
    /// no-op.
    pub(crate) async fn run(mut self) {
        log::debug!("[transfer {}] starting {}", self.id, self.address);

        let verdict = self.execute().await;

        // Every in-flight resource is gone before the terminal event: the
        // client, response stream, and watchdog guard died with `execute`,
        // and the sink lets go of its destination here.
        self.sink.release().await;

        let result = match verdict {
            Ok(payload) => {
                self.core.try_finish(Phase::Completed);
                log::debug!(
                    "[transfer {}] completed, {} received this session",
                    self.id,
                    format_bytes(self.tracker.bytes_received())
                );
                TransferResult::Success(payload)
            }
            Err(TransferError::Cancelled) => {
                self.core.try_finish(Phase::Cancelled);
                log::debug!("[transfer {}] cancelled", self.id);
                TransferResult::Cancelled
            }
            Err(error) => {
                self.core.try_finish(Phase::Faulted);
                log::info!("[transfer {}] faulted: {}", self.id, error);
                TransferResult::Faulted(error)
            }
        };

        let outcome = TransferOutcome {
            token: self.token.clone(),
            result,
        };
        let _ = self.events_tx.send(SessionEvent::Finished(outcome)).await;
    }

    async fn execute(&mut self) -> Result<TransferPayload, TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        // Acquire the destination before touching the network, so an
        // unopenable file fails fast with a disk error.
        self.sink.open().await?;

        let client = request::build_client(&self.config)?;
        let auth_header = request::precompute_auth(self.config.authentication.as_ref());

        let mut target = self.address.clone();
        let mut rehomed = false;
        let response = loop {
            let pending = request::build_request(
                &client,
                &target,
                &self.config,
                self.resume_offset,
                auth_header.as_deref(),
            )
            .send();

            let response = match self.watchdog.guard(&self.cancel, pending).await {
                WaitOutcome::Done(Ok(response)) => response,
                WaitOutcome::Done(Err(error)) => return Err(TransferError::Network(error)),
                WaitOutcome::Stalled => return Err(self.stall_error()),
                WaitOutcome::Cancelled => return Err(TransferError::Cancelled),
            };

            let status = response.status();
            let resolved = response.url().to_string();

            // Some servers signal a relocation with a client-error status
            // while the response URI already points at the real location.
            // Re-fetch the resolved address, at most once per session.
            if status.is_client_error() && resolved != target && !rehomed {
                log::info!(
                    "[transfer {}] {} at {}, re-fetching resolved address {}",
                    self.id,
                    status,
                    target,
                    resolved
                );
                rehomed = true;
                target = resolved;
                continue;
            }

            if !status.is_success() {
                return Err(TransferError::Protocol(status));
            }
            break response;
        };

        if self.resume_offset > 0 && response.status() == StatusCode::OK {
            log::warn!(
                "[transfer {}] server ignored Range (200 with resume offset {})",
                self.id,
                self.resume_offset
            );
        }

        let remaining = response.content_length();
        self.tracker.set_total(remaining);
        self.sink.prepare(remaining);

        let info = describe_response(&response, self.resume_offset);
        let _ = self.events_tx.send(SessionEvent::Response(info)).await;

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        loop {
            let step = match self.watchdog.guard(&self.cancel, stream.next()).await {
                WaitOutcome::Done(step) => step,
                WaitOutcome::Stalled => return Err(self.stall_error()),
                WaitOutcome::Cancelled => return Err(TransferError::Cancelled),
            };
            let chunk = match step {
                Some(Ok(chunk)) => chunk,
                Some(Err(error)) => return Err(TransferError::Network(error)),
                None => break,
            };

            // Cap the write to the declared remaining length. Servers may
            // keep sending past the advertised size; without this guard the
            // totals drift past the declared total.
            let usable = match remaining {
                Some(limit) => {
                    let left = limit.saturating_sub(received);
                    (chunk.len() as u64).min(left) as usize
                }
                None => chunk.len(),
            };
            if usable == 0 {
                break;
            }

            self.sink.write_chunk(&chunk[..usable]).await?;
            received += usable as u64;
            if let Some(sample) = self.tracker.record(usable as u64) {
                let _ = self.events_tx.try_send(SessionEvent::Progress(sample));
            }
            if let Some(limit) = remaining {
                if received >= limit {
                    break;
                }
            }
        }
        drop(stream);

        let final_sample = self.tracker.final_sample();
        let _ = self
            .events_tx
            .send(SessionEvent::Progress(final_sample))
            .await;

        self.sink.finish().await
    }

    fn stall_error(&self) -> TransferError {
        TransferError::Stalled(self.watchdog.limit().unwrap_or_default())
    }
}

/// Response metadata for the response-received notification.
fn describe_response(response: &reqwest::Response, resumed_from: u64) -> ResponseInfo {
    ResponseInfo {
        status: response.status().as_u16(),
        final_uri: response.url().to_string(),
        content_length: response.content_length(),
        content_type: header_str(response, "content-type"),
        last_modified: header_str(response, "last-modified"),
        attachment_name: header_str(response, "content-disposition")
            .as_deref()
            .and_then(request::extract_filename),
        resumed_from,
    }
}

fn header_str(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

//! Per-file upload driver.
//!
//! Drives one file through initiate, parallel part uploads, complete and
//! (on failure or cancellation) abort. Workers run as a structured set in
//! the calling task, so every in-flight request is owned by the upload
//! future: cancelling the file's token or dropping the future drops them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use ghs_transfer::{PartRange, RateReporter, plan_parts, should_use_multipart};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{MultipartApi, PartReceipt};
use crate::error::UploadError;
use crate::state::{FailureAction, FileUploadState};
use crate::types::{FileId, UploadConfig, UploadEvent, UploadFile, UploadOutcome, UploadStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes progress and throughput for one file.
///
/// Called from transport progress callbacks, so events are sent with
/// `try_send` and dropped when the channel is full.
struct ProgressSink<'a> {
    file_id: FileId,
    total: u64,
    reporter: Mutex<RateReporter>,
    events: &'a mpsc::Sender<UploadEvent>,
}

impl<'a> ProgressSink<'a> {
    fn new(file: &UploadFile, config: &UploadConfig, events: &'a mpsc::Sender<UploadEvent>) -> Self {
        let total = file.size();
        Self {
            file_id: file.id,
            total,
            reporter: Mutex::new(RateReporter::started_at(
                total,
                Some(config.rate_interval),
                Instant::now().into_std(),
            )),
            events,
        }
    }

    fn report(&self, sent: u64) {
        let _ = self.events.try_send(UploadEvent::Progress {
            file_id: self.file_id,
            sent_bytes: sent.min(self.total),
            total_bytes: self.total,
        });

        let now = Instant::now().into_std();
        let sample = {
            let mut reporter = lock(&self.reporter);
            reporter
                .sample_at(sent, now)
                .map(|rate| (rate, reporter.eta_at(sent, now)))
        };
        if let Some((bytes_per_sec, eta)) = sample {
            let _ = self.events.try_send(UploadEvent::Rate {
                file_id: self.file_id,
                bytes_per_sec,
                eta,
            });
        }
    }

    fn average_rate(&self) -> f64 {
        lock(&self.reporter).average_rate_at(Instant::now().into_std())
    }
}

/// Everything the workers of one multipart upload share.
struct FileContext<'a> {
    file: &'a UploadFile,
    session_id: String,
    state: Mutex<FileUploadState>,
    /// First fatal error, returned to the caller.
    failure: Mutex<Option<UploadError>>,
    /// Child of the caller's token; also cancelled on a fatal part error.
    cancel: CancellationToken,
    sink: ProgressSink<'a>,
}

/// Uploads single files against a [`MultipartApi`].
pub struct UploadCoordinator {
    api: Arc<dyn MultipartApi>,
    config: UploadConfig,
    events: mpsc::Sender<UploadEvent>,
}

impl UploadCoordinator {
    pub fn new(
        api: Arc<dyn MultipartApi>,
        config: UploadConfig,
        events: mpsc::Sender<UploadEvent>,
    ) -> Self {
        Self {
            api,
            config,
            events,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Uploads `file`, reporting events along the way.
    ///
    /// Exactly one terminal event (`Completed`, `Failed` or `Canceled`)
    /// is emitted per call.
    pub async fn upload(
        &self,
        file: &UploadFile,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let result = self.run(file, &cancel).await;

        match &result {
            Ok(outcome) => {
                info!(
                    file = %file.id,
                    path = %file.object_path,
                    parts = outcome.parts,
                    chunked = outcome.chunked,
                    "upload completed"
                );
                self.emit(UploadEvent::Completed {
                    file_id: file.id,
                    descriptor: outcome.descriptor.clone(),
                    average_rate: outcome.average_rate,
                })
                .await;
            }
            Err(UploadError::Cancelled) => {
                info!(file = %file.id, path = %file.object_path, "upload canceled");
                self.emit(UploadEvent::Canceled { file_id: file.id }).await;
            }
            Err(e) => {
                error!(file = %file.id, path = %file.object_path, error = %e, "upload failed");
                self.emit(UploadEvent::Failed {
                    file_id: file.id,
                    error: e.to_string(),
                })
                .await;
            }
        }

        result
    }

    async fn run(
        &self,
        file: &UploadFile,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        self.config.validate()?;
        let ranges = plan_parts(file.size(), self.config.chunk_size)?;
        let chunked = should_use_multipart(
            ranges.len(),
            self.config.threshold,
            self.config.multipart_enabled,
        );

        self.emit(UploadEvent::Started {
            file_id: file.id,
            path: file.object_path.clone(),
            total_bytes: file.size(),
            chunked,
        })
        .await;
        info!(
            file = %file.id,
            path = %file.object_path,
            bytes = file.size(),
            parts = ranges.len(),
            chunked,
            "upload started"
        );

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        if chunked {
            self.upload_multipart(file, ranges, cancel).await
        } else {
            self.upload_whole(file, cancel).await
        }
    }

    /// Single-request upload for files below the multipart threshold.
    async fn upload_whole(
        &self,
        file: &UploadFile,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let sink = ProgressSink::new(file, &self.config, &self.events);
        let progress = |sent: u64| sink.report(sent);

        let descriptor = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = self.api.put_object(&file.object_path, &file.source, &progress) => result?,
        };

        Ok(UploadOutcome {
            file_id: file.id,
            path: file.object_path.clone(),
            chunked: false,
            parts: 1,
            descriptor,
            average_rate: sink.average_rate(),
        })
    }

    async fn upload_multipart(
        &self,
        file: &UploadFile,
        ranges: Vec<PartRange>,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let part_count = ranges.len();
        let mut state = FileUploadState::new(ranges, self.config.concurrency);

        let initiated = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = self.api.initiate(&file.object_path) => result,
        };
        let session_id = initiated.map_err(|e| match e {
            UploadError::Initiation(_) => e,
            other => UploadError::Initiation(other.to_string()),
        })?;
        debug!(file = %file.id, session = %session_id, parts = part_count, "session initiated");
        state.start(session_id.clone());

        let ctx = FileContext {
            file,
            session_id,
            state: Mutex::new(state),
            failure: Mutex::new(None),
            cancel: cancel.child_token(),
            sink: ProgressSink::new(file, &self.config, &self.events),
        };

        let workers = self.config.concurrency.min(part_count);
        let mut set: FuturesUnordered<_> = (0..workers).map(|_| self.worker(&ctx)).collect();
        while set.next().await.is_some() {}
        drop(set);

        let (status, parts) = {
            let mut state = lock(&ctx.state);
            if cancel.is_cancelled() && !state.is_aborted() {
                state.cancel();
            }
            let parts = state.begin_complete();
            if parts.is_none() && state.status() == UploadStatus::Uploading {
                state.fail("workers stopped with parts outstanding");
            }
            (state.status(), parts)
        };

        let parts = match (status, parts) {
            (UploadStatus::Completing, Some(parts)) => parts,
            (UploadStatus::Canceled, _) => {
                self.abort_session(&ctx).await;
                return Err(UploadError::Cancelled);
            }
            _ => {
                self.abort_session(&ctx).await;
                return Err(self.take_failure(&ctx));
            }
        };

        // Not raced against `cancel`: the server assembles the object once
        // the request is out, so it runs to the end.
        debug!(file = %file.id, parts = parts.len(), "completing session");
        let completed = self
            .api
            .complete(&file.object_path, &ctx.session_id, &parts)
            .await;

        match completed {
            Ok(descriptor) => {
                lock(&ctx.state).complete_succeeded();
                Ok(UploadOutcome {
                    file_id: file.id,
                    path: file.object_path.clone(),
                    chunked: true,
                    parts: part_count,
                    descriptor,
                    average_rate: ctx.sink.average_rate(),
                })
            }
            Err(e) => {
                let e = match e {
                    UploadError::Completion(_) => e,
                    other => UploadError::Completion(other.to_string()),
                };
                lock(&ctx.state).fail(e.to_string());
                self.abort_session(&ctx).await;
                Err(e)
            }
        }
    }

    /// Pulls part indices until the queue drains or the file stops.
    async fn worker(&self, ctx: &FileContext<'_>) {
        loop {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let Some(index) = lock(&ctx.state).next_dispatch() else {
                return;
            };
            if !self.send_part(ctx, index).await {
                return;
            }
        }
    }

    /// Sends one part, retrying it in place on HTTP 408. Returns `false`
    /// when the worker should stop.
    async fn send_part(&self, ctx: &FileContext<'_>, index: usize) -> bool {
        loop {
            let result = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    let mut state = lock(&ctx.state);
                    state.release(index);
                    if !state.is_aborted() {
                        state.cancel();
                    }
                    return false;
                }
                result = self.attempt_part(ctx, index) => result,
            };

            let err = match result {
                Ok(receipt) => {
                    let stored = lock(&ctx.state).part_succeeded(index, receipt.entity_tag);
                    debug!(file = %ctx.file.id, index, stored, "part settled");
                    return stored;
                }
                Err(err) => err,
            };

            let (action, part_number, attempt) = {
                let mut state = lock(&ctx.state);
                let action = state.part_failed(index, &err, &self.config.part_retry);
                let part = state.part(index);
                (
                    action,
                    part.map(|p| p.part_number()).unwrap_or_default(),
                    part.map(|p| p.attempts).unwrap_or_default(),
                )
            };

            match action {
                FailureAction::Retry(delay) => {
                    warn!(
                        file = %ctx.file.id,
                        part = part_number,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "part timed out, retrying"
                    );
                    self.emit(UploadEvent::Retrying {
                        file_id: ctx.file.id,
                        part_number,
                        attempt,
                        delay,
                    })
                    .await;

                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => {
                            let mut state = lock(&ctx.state);
                            state.release(index);
                            if !state.is_aborted() {
                                state.cancel();
                            }
                            return false;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }

                    if !lock(&ctx.state).requeue(index) {
                        return false;
                    }
                }
                FailureAction::Fatal => {
                    error!(file = %ctx.file.id, part = part_number, error = %err, "part failed");
                    *lock(&ctx.failure) = Some(err);
                    ctx.cancel.cancel();
                    return false;
                }
                FailureAction::Suppressed => {
                    debug!(file = %ctx.file.id, part = part_number, error = %err, "late part failure ignored");
                    return false;
                }
            }
        }
    }

    async fn attempt_part(
        &self,
        ctx: &FileContext<'_>,
        index: usize,
    ) -> Result<PartReceipt, UploadError> {
        let range = match lock(&ctx.state).part(index) {
            Some(part) => part.range,
            None => {
                return Err(UploadError::PartTransport {
                    status: None,
                    body: format!("unknown part index {index}"),
                });
            }
        };

        let body = ctx.file.source.read_range(&range).await?;
        debug!(
            file = %ctx.file.id,
            part = range.part_number(),
            bytes = body.len(),
            "sending part"
        );

        let progress = |sent: u64| {
            let total = lock(&ctx.state).record_progress(index, sent);
            ctx.sink.report(total);
        };

        self.api
            .upload_part(
                &ctx.file.object_path,
                &ctx.session_id,
                range.part_number(),
                body,
                &progress,
            )
            .await
    }

    /// Discards the server-side session, at most once per file. Errors are
    /// logged and swallowed; 408 is retried per `abort_retry`.
    async fn abort_session(&self, ctx: &FileContext<'_>) {
        if !lock(&ctx.state).begin_abort() {
            return;
        }

        let policy = &self.config.abort_retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.api.abort(&ctx.file.object_path, &ctx.session_id).await {
                Ok(()) => {
                    info!(file = %ctx.file.id, session = %ctx.session_id, "session aborted");
                    return;
                }
                Err(e) if e.is_timeout() && policy.allows_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        file = %ctx.file.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "abort timed out, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(file = %ctx.file.id, session = %ctx.session_id, error = %e, "abort failed");
                    return;
                }
            }
        }
    }

    fn take_failure(&self, ctx: &FileContext<'_>) -> UploadError {
        if let Some(err) = lock(&ctx.failure).take() {
            return err;
        }
        let message = lock(&ctx.state)
            .error()
            .unwrap_or("upload stopped")
            .to_string();
        UploadError::PartTransport {
            status: None,
            body: message,
        }
    }

    async fn emit(&self, event: UploadEvent) {
        let _ = self.events.send(event).await;
    }
}

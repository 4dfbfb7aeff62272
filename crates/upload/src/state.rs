//! Per-file upload state machine.
//!
//! All mutation goes through [`FileUploadState`], which is owned by the
//! coordinator task. Workers never touch it directly; they report results
//! and the coordinator applies them here. The once-guards make terminal
//! transitions, completion and abort idempotent no matter how many
//! in-flight requests settle afterwards.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use ghs_transfer::{Part, PartRange, PartStatus};

use crate::client::CompletedPart;
use crate::error::UploadError;
use crate::types::{RetryPolicy, UploadStatus};

/// What the coordinator should do after a part request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Retry the same part after `delay`, keeping its worker slot.
    Retry(Duration),
    /// The file is now errored; abort the session.
    Fatal,
    /// The file already reached a terminal state; ignore the failure.
    Suppressed,
}

/// Mutable state of one file upload.
#[derive(Debug)]
pub struct FileUploadState {
    parts: Vec<Part>,
    queue: VecDeque<usize>,
    in_flight: BTreeSet<usize>,
    concurrency: usize,
    status: UploadStatus,
    session_id: Option<String>,
    aborted: bool,
    error_handled: bool,
    abort_issued: bool,
    complete_issued: bool,
    error: Option<String>,
}

impl FileUploadState {
    /// Creates the state for `ranges`, every part pending.
    pub fn new(ranges: Vec<PartRange>, concurrency: usize) -> Self {
        let parts: Vec<Part> = ranges.into_iter().map(Part::new).collect();
        let queue = (0..parts.len()).collect();
        Self {
            parts,
            queue,
            in_flight: BTreeSet::new(),
            concurrency: concurrency.max(1),
            status: UploadStatus::Initializing,
            session_id: None,
            aborted: false,
            error_handled: false,
            abort_issued: false,
            complete_issued: false,
            error: None,
        }
    }

    /// Records the session id returned by initiate and starts uploading.
    pub fn start(&mut self, session_id: String) {
        self.session_id = Some(session_id);
        if self.status == UploadStatus::Initializing {
            self.status = UploadStatus::Uploading;
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn part(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    /// First fatal error message, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Pops the lowest pending index and marks it in flight.
    pub fn next_dispatch(&mut self) -> Option<usize> {
        if self.aborted
            || self.status != UploadStatus::Uploading
            || self.in_flight.len() >= self.concurrency
        {
            return None;
        }

        let index = self.queue.pop_front()?;
        self.parts[index].mark_in_flight();
        self.in_flight.insert(index);
        Some(index)
    }

    /// Records cumulative bytes for the current attempt of `index` and
    /// returns the file-wide total.
    pub fn record_progress(&mut self, index: usize, bytes: u64) -> u64 {
        if let Some(part) = self.parts.get_mut(index) {
            if part.status == PartStatus::InFlight {
                part.set_bytes_sent(bytes);
            }
        }
        self.total_sent()
    }

    /// Bytes sent across all parts: stored parts count fully, in-flight
    /// parts count their current attempt.
    pub fn total_sent(&self) -> u64 {
        self.parts
            .iter()
            .map(|p| match p.status {
                PartStatus::Done => p.range.len(),
                PartStatus::InFlight => p.bytes_sent,
                PartStatus::Pending | PartStatus::Failed => 0,
            })
            .sum()
    }

    /// Marks `index` stored. Returns `false` when the result is ignored
    /// because the file already left the uploading state.
    pub fn part_succeeded(&mut self, index: usize, entity_tag: String) -> bool {
        self.in_flight.remove(&index);
        if self.aborted || self.status.is_terminal() {
            return false;
        }
        match self.parts.get_mut(index) {
            Some(part) if !part.is_done() => {
                part.mark_done(entity_tag);
                true
            }
            _ => false,
        }
    }

    /// Classifies a failed request for `index`.
    ///
    /// HTTP 408 is retried while the policy allows it; the part keeps its
    /// slot and must be put back with [`requeue`](Self::requeue). Anything
    /// else, or an exhausted policy, fails the file.
    pub fn part_failed(
        &mut self,
        index: usize,
        err: &UploadError,
        policy: &RetryPolicy,
    ) -> FailureAction {
        if self.aborted || self.status.is_terminal() {
            self.in_flight.remove(&index);
            return FailureAction::Suppressed;
        }

        let Some(part) = self.parts.get_mut(index) else {
            return FailureAction::Suppressed;
        };
        part.mark_failed();

        if err.is_timeout() && policy.allows_retry(part.attempts) {
            return FailureAction::Retry(policy.delay_for_attempt(part.attempts));
        }

        self.in_flight.remove(&index);
        if self.fail(err.to_string()) {
            FailureAction::Fatal
        } else {
            FailureAction::Suppressed
        }
    }

    /// Starts the next attempt of a part that is being retried.
    /// Returns `false` if the file stopped in the meantime.
    pub fn requeue(&mut self, index: usize) -> bool {
        if self.aborted || self.status.is_terminal() {
            self.in_flight.remove(&index);
            return false;
        }
        match self.parts.get_mut(index) {
            Some(part) if part.status == PartStatus::Failed => {
                part.mark_in_flight();
                self.in_flight.insert(index);
                true
            }
            _ => false,
        }
    }

    /// Drops a worker's slot without changing the part (cancelled request).
    pub fn release(&mut self, index: usize) {
        self.in_flight.remove(&index);
    }

    /// User cancellation. Returns `false` if the file is already terminal
    /// or completing: once the complete request is out, the server
    /// assembles the object regardless.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() || self.status == UploadStatus::Completing {
            return false;
        }
        self.status = UploadStatus::Canceled;
        self.aborted = true;
        self.error_handled = true;
        self.queue.clear();
        true
    }

    /// Moves the file to `Errored`. Only the first call has an effect.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.error_handled || self.status.is_terminal() {
            return false;
        }
        self.error_handled = true;
        self.aborted = true;
        self.status = UploadStatus::Errored;
        self.error = Some(message.into());
        self.queue.clear();
        true
    }

    /// Whether every part has been stored.
    pub fn all_done(&self) -> bool {
        self.parts.iter().all(Part::is_done)
    }

    /// Hands out the part list for completion, at most once and only when
    /// every part is stored and no request is outstanding.
    pub fn begin_complete(&mut self) -> Option<Vec<CompletedPart>> {
        if self.complete_issued
            || self.aborted
            || self.status != UploadStatus::Uploading
            || !self.in_flight.is_empty()
            || !self.all_done()
        {
            return None;
        }
        self.complete_issued = true;
        self.status = UploadStatus::Completing;

        let mut parts: Vec<CompletedPart> = self
            .parts
            .iter()
            .filter_map(|p| {
                p.entity_tag.as_ref().map(|tag| CompletedPart {
                    part_number: p.part_number(),
                    entity_tag: tag.clone(),
                })
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);
        Some(parts)
    }

    pub fn complete_succeeded(&mut self) {
        if self.status == UploadStatus::Completing {
            self.status = UploadStatus::Completed;
        }
    }

    /// Returns `true` exactly once, and only if a session exists to abort.
    pub fn begin_abort(&mut self) -> bool {
        if self.abort_issued || self.session_id.is_none() {
            return false;
        }
        self.abort_issued = true;
        true
    }
}

//! Multi-file upload orchestrator.
//!
//! Runs several file uploads at once, aggregates their events on one
//! channel, and supports cancelling everything or a single file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::MultipartApi;
use crate::coordinator::UploadCoordinator;
use crate::error::UploadError;
use crate::types::{
    FileId, FileResult, UploadConfig, UploadEvent, UploadFile, UploadOutcome, UploadStatus,
};

/// Uploads batches of files with bounded file-level parallelism.
pub struct UploadOrchestrator {
    coordinator: UploadCoordinator,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
    file_tokens: Mutex<HashMap<FileId, CancellationToken>>,
}

impl UploadOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(api: Arc<dyn MultipartApi>, config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            coordinator: UploadCoordinator::new(api, config, events_tx),
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
            file_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a token that cancels every upload of this orchestrator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels one file, queued or in progress. Returns `false` if the
    /// file is unknown or already finished.
    pub fn cancel_file(&self, id: FileId) -> bool {
        let tokens = self
            .file_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match tokens.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Uploads `files`, at most `parallel_files` at a time.
    ///
    /// A failing file does not stop the others. Returns one result per
    /// file, in input order.
    pub async fn upload_all(&self, files: Vec<UploadFile>) -> Vec<FileResult> {
        if files.is_empty() {
            return Vec::new();
        }

        let parallel = self.coordinator.config().parallel_files.max(1);
        info!(files = files.len(), parallel, "starting batch upload");

        let tokens: Vec<CancellationToken> = {
            let mut map = self
                .file_tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            files
                .iter()
                .map(|f| {
                    let token = self.cancel.child_token();
                    map.insert(f.id, token.clone());
                    token
                })
                .collect()
        };

        let results: Vec<FileResult> = stream::iter(files.into_iter().zip(tokens))
            .map(|(file, token)| async move {
                let result = self.coordinator.upload(&file, token).await;
                self.file_tokens
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&file.id);
                file_result(&file, result)
            })
            .buffered(parallel)
            .collect()
            .await;

        let failed = results
            .iter()
            .filter(|r| r.status != UploadStatus::Completed)
            .count();
        if failed > 0 {
            warn!(failed, total = results.len(), "batch finished with failures");
        } else {
            info!(total = results.len(), "batch finished");
        }

        results
    }
}

fn file_result(
    file: &UploadFile,
    result: Result<UploadOutcome, UploadError>,
) -> FileResult {
    match result {
        Ok(outcome) => FileResult {
            file_id: file.id,
            path: file.object_path.clone(),
            status: UploadStatus::Completed,
            error: None,
            outcome: Some(outcome),
        },
        Err(UploadError::Cancelled) => FileResult {
            file_id: file.id,
            path: file.object_path.clone(),
            status: UploadStatus::Canceled,
            error: Some(UploadError::Cancelled.to_string()),
            outcome: None,
        },
        Err(e) => FileResult {
            file_id: file.id,
            path: file.object_path.clone(),
            status: UploadStatus::Errored,
            error: Some(e.to_string()),
            outcome: None,
        },
    }
}

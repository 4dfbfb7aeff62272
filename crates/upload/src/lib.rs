//! Chunked multipart upload coordinator for the ghs file server.
//!
//! Large files are split into fixed-size parts and sent over the server's
//! S3-style multipart endpoints with bounded per-file concurrency; small
//! files go up in a single request. The crate has no UI: callers consume
//! [`UploadEvent`]s from a channel and drive cancellation through
//! `CancellationToken`s.
//!
//! # Flow
//!
//! 1. **Plan** - split the file into parts, pick multipart or single PUT
//! 2. **Initiate** - open a session and obtain its upload id
//! 3. **Upload** - send parts through a fixed pool of workers, retrying 408s
//! 4. **Complete** - assemble the object once every part is stored
//! 5. **Abort** - discard the session after a fatal error or a cancel

pub mod client;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod scanner;
pub mod state;
pub mod types;
pub mod wire;

// Re-export primary types for convenience.
pub use client::{
    ApiFuture, CompletedPart, MultipartApi, ObjectDescriptor, PartReceipt, ProgressFn,
};
pub use coordinator::UploadCoordinator;
pub use error::UploadError;
pub use http::HttpClient;
pub use orchestrator::UploadOrchestrator;
pub use scanner::{LocalFile, scan_files_for_upload};
pub use state::{FailureAction, FileUploadState};
pub use types::{
    FileId, FileResult, RetryPolicy, UploadConfig, UploadEvent, UploadFile, UploadOutcome,
    UploadStatus,
};

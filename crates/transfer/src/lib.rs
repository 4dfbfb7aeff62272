//! Part planning and payload handling for chunked multipart uploads.
//!
//! This crate knows nothing about HTTP. It splits a file into fixed-size
//! byte ranges, materializes each range lazily when a part is dispatched,
//! tracks per-part state and turns cumulative byte counts into a
//! displayable throughput.

mod chunked;
mod progress;
mod types;
mod validation;

pub use chunked::{PartRange, PartSource, plan_parts, should_use_multipart};
pub use progress::{DEFAULT_RATE_INTERVAL, RateReporter, format_rate};
pub use types::{Part, PartStatus};
pub use validation::{check_name_legal, object_path, path_join, validate_upload_path};

/// Default part size: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("short read: expected {expected} bytes at offset {offset}, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

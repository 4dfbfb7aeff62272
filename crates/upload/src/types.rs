//! Data types for the upload flow.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use ghs_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_RATE_INTERVAL, PartSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::ObjectDescriptor;
use crate::error::UploadError;

/// Bounded retry schedule used for HTTP 408 responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1), 5)
    }
}

impl RetryPolicy {
    /// Same delay between every attempt.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
            max_attempts,
        }
    }

    /// Policy used for abort requests: 1 s doubling up to 8 s.
    pub fn abort_default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            backoff_factor: 2.0,
            max_attempts: 5,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.max(1.0).powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Whether another attempt is allowed after `attempts` have failed.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Settings shared by every file upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Use the multipart protocol at all.
    pub multipart_enabled: bool,
    /// Size of each part in bytes.
    pub chunk_size: u64,
    /// Maximum in-flight part requests per file.
    pub concurrency: usize,
    /// Multipart is used only when a file splits into more parts than this.
    pub threshold: usize,
    /// Files uploaded at the same time.
    pub parallel_files: usize,
    /// Minimum time between two throughput samples.
    #[serde(with = "millis")]
    pub rate_interval: Duration,
    /// 408 policy for part requests.
    pub part_retry: RetryPolicy,
    /// 408 policy for abort requests.
    pub abort_retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_enabled: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 3,
            threshold: 3,
            parallel_files: 4,
            rate_interval: DEFAULT_RATE_INTERVAL,
            part_retry: RetryPolicy::default(),
            abort_retry: RetryPolicy::abort_default(),
        }
    }
}

impl UploadConfig {
    /// Rejects settings the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.concurrency == 0 {
            return Err(UploadError::InvalidConfig("concurrency must be > 0".into()));
        }
        if self.parallel_files == 0 {
            return Err(UploadError::InvalidConfig(
                "parallel_files must be > 0".into(),
            ));
        }
        if self.part_retry.max_attempts == 0 || self.abort_retry.max_attempts == 0 {
            return Err(UploadError::InvalidConfig(
                "retry max_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Identifies one file across events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A file queued for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub id: FileId,
    /// Request path of the object on the server (already encoded).
    pub object_path: String,
    pub source: PartSource,
}

impl UploadFile {
    pub fn new(object_path: impl Into<String>, source: PartSource) -> Self {
        Self {
            id: FileId::new(),
            object_path: object_path.into(),
            source,
        }
    }

    /// Uploads the local file at `local` to `dest_dir/relative`.
    pub fn from_path(local: &Path, dest_dir: &str, relative: &str) -> Result<Self, UploadError> {
        let object_path = ghs_transfer::object_path(dest_dir, relative)?;
        let source = PartSource::file(local)?;
        Ok(Self::new(object_path, source))
    }

    pub fn size(&self) -> u64 {
        self.source.len()
    }
}

/// Lifecycle of a file upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Initializing,
    Uploading,
    Completing,
    Completed,
    Canceled,
    Errored,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Errored)
    }
}

/// Event emitted while files upload.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Started {
        file_id: FileId,
        path: String,
        total_bytes: u64,
        chunked: bool,
    },
    /// Cumulative bytes handed to the transport.
    Progress {
        file_id: FileId,
        sent_bytes: u64,
        total_bytes: u64,
    },
    /// Instantaneous throughput, sampled at most every `rate_interval`,
    /// with the time left estimated from the average rate so far.
    Rate {
        file_id: FileId,
        bytes_per_sec: f64,
        eta: Option<Duration>,
    },
    Retrying {
        file_id: FileId,
        part_number: u32,
        attempt: u32,
        delay: Duration,
    },
    Completed {
        file_id: FileId,
        descriptor: ObjectDescriptor,
        average_rate: f64,
    },
    Failed { file_id: FileId, error: String },
    Canceled { file_id: FileId },
}

impl UploadEvent {
    pub fn file_id(&self) -> FileId {
        match self {
            Self::Started { file_id, .. }
            | Self::Progress { file_id, .. }
            | Self::Rate { file_id, .. }
            | Self::Retrying { file_id, .. }
            | Self::Completed { file_id, .. }
            | Self::Failed { file_id, .. }
            | Self::Canceled { file_id } => *file_id,
        }
    }
}

/// Result of a successful file upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub file_id: FileId,
    pub path: String,
    /// Whether the multipart protocol was used.
    pub chunked: bool,
    pub parts: usize,
    pub descriptor: ObjectDescriptor,
    pub average_rate: f64,
}

/// Per-file result reported by the orchestrator.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub file_id: FileId,
    pub path: String,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub outcome: Option<UploadOutcome>,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_upload_page() {
        let config = UploadConfig::default();
        assert!(config.multipart_enabled);
        assert_eq!(config.chunk_size, 8 * 1024 * 1024);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.threshold, 3);
        assert_eq!(config.parallel_files, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_values() {
        let config = UploadConfig {
            concurrency: 0,
            ..UploadConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UploadError::InvalidConfig(_))
        ));

        let config = UploadConfig {
            chunk_size: 0,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn fixed_policy_delay() {
        let p = RetryPolicy::fixed(Duration::from_millis(1000), 3);
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(p.delay_for_attempt(5), Duration::from_secs(1));
        assert!(p.allows_retry(2));
        assert!(!p.allows_retry(3));
    }

    #[test]
    fn abort_policy_backs_off_and_caps() {
        let p = RetryPolicy::abort_default();
        let delays: Vec<u64> = (1..=6).map(|a| p.delay_for_attempt(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn status_terminal() {
        assert!(UploadStatus::Completed.is_terminal());
        assert!(UploadStatus::Canceled.is_terminal());
        assert!(UploadStatus::Errored.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());
        assert!(!UploadStatus::Completing.is_terminal());
    }

    #[test]
    fn config_json_uses_millis() {
        let json = serde_json::to_value(UploadConfig::default()).unwrap();
        assert_eq!(json["rate_interval"], 500);
        assert_eq!(json["part_retry"]["initial_delay"], 1000);

        let parsed: UploadConfig =
            serde_json::from_str(r#"{"concurrency": 5, "part_retry": {"max_attempts": 2}}"#)
                .unwrap();
        assert_eq!(parsed.concurrency, 5);
        assert_eq!(parsed.part_retry.max_attempts, 2);
        assert_eq!(parsed.part_retry.initial_delay, Duration::from_secs(1));
        assert_eq!(parsed.threshold, 3);
    }
}

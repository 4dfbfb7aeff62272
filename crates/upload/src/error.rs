//! Upload error types.

/// HTTP status the server uses to ask for a retry.
pub const STATUS_REQUEST_TIMEOUT: u16 = 408;

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The session could not be initiated or no usable upload id came back.
    #[error("initiate failed: {0}")]
    Initiation(String),

    /// A part request failed. `status` is `None` when no response arrived.
    #[error("part upload failed ({}): {body}", status_label(.status))]
    PartTransport { status: Option<u16>, body: String },

    #[error("complete failed: {0}")]
    Completion(String),

    #[error("abort failed ({}): {body}", status_label(.status))]
    Abort { status: Option<u16>, body: String },

    /// Whole-file upload (no multipart) failed.
    #[error("upload failed ({}): {body}", status_label(.status))]
    Put { status: Option<u16>, body: String },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] ghs_transfer::TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// HTTP status carried by a transport error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::PartTransport { status, .. }
            | Self::Abort { status, .. }
            | Self::Put { status, .. } => *status,
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` for an HTTP 408 response, the only retryable failure.
    pub fn is_timeout(&self) -> bool {
        self.status() == Some(STATUS_REQUEST_TIMEOUT)
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "no response".to_string(),
    }
}

//! Session client trait for the multipart endpoints.
//!
//! `MultipartApi` is the seam between upload logic and HTTP. The
//! coordinator only talks to this trait, which keeps the state machine
//! testable with in-memory mocks; [`HttpClient`](crate::http::HttpClient)
//! is the production implementation.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use ghs_transfer::PartSource;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Boxed future returned by [`MultipartApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Progress callback invoked with cumulative bytes sent for one request.
pub type ProgressFn<'p> = dyn Fn(u64) + Send + Sync + 'p;

/// What the server returned for a stored part.
#[derive(Debug, Clone, Default)]
pub struct PartReceipt {
    pub entity_tag: String,
    /// Response headers, names lowercased.
    pub headers: BTreeMap<String, String>,
}

/// A part reference sent when completing a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub entity_tag: String,
}

/// Final object description returned by complete (or a whole-file PUT).
///
/// Every field is optional since the server may answer with an empty body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectDescriptor {
    pub location: Option<String>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub entity_tag: Option<String>,
    /// Raw response body.
    pub raw: String,
}

/// Multipart endpoints of the file server, addressed by object path.
pub trait MultipartApi: Send + Sync {
    /// Starts a session and returns its upload id.
    fn initiate<'a>(&'a self, path: &'a str) -> ApiFuture<'a, String>;

    /// Sends one part. `progress` receives cumulative bytes for this part.
    fn upload_part<'a>(
        &'a self,
        path: &'a str,
        session_id: &'a str,
        part_number: u32,
        body: Bytes,
        progress: &'a ProgressFn<'a>,
    ) -> ApiFuture<'a, PartReceipt>;

    /// Assembles the object from `parts`.
    fn complete<'a>(
        &'a self,
        path: &'a str,
        session_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> ApiFuture<'a, ObjectDescriptor>;

    /// Discards a partial upload.
    fn abort<'a>(&'a self, path: &'a str, session_id: &'a str) -> ApiFuture<'a, ()>;

    /// Uploads a whole file in one request, streaming it from `source`.
    fn put_object<'a>(
        &'a self,
        path: &'a str,
        source: &'a PartSource,
        progress: &'a ProgressFn<'a>,
    ) -> ApiFuture<'a, ObjectDescriptor>;
}

//! reqwest implementation of [`MultipartApi`].
//!
//! Endpoints, all relative to the object path:
//!
//! | operation   | request                                  |
//! |-------------|------------------------------------------|
//! | initiate    | `POST {path}?uploads`                    |
//! | upload part | `PUT {path}?partNumber=N&uploadId=ID`    |
//! | complete    | `POST {path}?uploadId=ID` (XML body)     |
//! | abort       | `DELETE {path}?uploadId=ID`              |
//! | put object  | `PUT {path}`                             |

use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use reqwest::header::{
    ACCEPT, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, HeaderValue,
};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use ghs_transfer::{PartSource, path_join};

use crate::client::{
    ApiFuture, CompletedPart, MultipartApi, ObjectDescriptor, PartReceipt, ProgressFn,
};
use crate::error::UploadError;
use crate::wire;

/// Request bodies are streamed in slices of this size so progress can be
/// reported while a part is in flight.
pub const STREAM_SLICE: usize = 64 * 1024;

type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// HTTP client for the file server's multipart endpoints.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    prefix: String,
    timeout: Option<Duration>,
}

impl HttpClient {
    /// Creates a client for the server at `base_url` (e.g. `http://nas:8080`).
    pub fn new(base_url: &str) -> Result<Self, UploadError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(
            "x-requested-with",
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self::with_client(http, base_url))
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            prefix: String::new(),
            timeout: None,
        }
    }

    /// Mounts every object path below `prefix` (e.g. `/api/s3`).
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_matches('/').to_string();
        self
    }

    /// Applies a per-request timeout. Part uploads of large chunks on slow
    /// links need a generous value.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.request(method, url);
        match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    /// Full URL of an object, without query string.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            path_join(&["/", &self.prefix, path])
        )
    }

    async fn send_with_progress(
        &self,
        request: reqwest::RequestBuilder,
        total: u64,
        body: BodyStream,
        progress: &ProgressFn<'_>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        if total == 0 {
            let response = request.body(Bytes::new()).send().await?;
            progress(0);
            return Ok(response);
        }

        let (tx, mut rx) = watch::channel(0u64);
        let request = request
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(counted(body, tx)));

        let send = request.send();
        tokio::pin!(send);

        loop {
            tokio::select! {
                result = &mut send => {
                    let response = result?;
                    progress(total);
                    return Ok(response);
                }
                changed = rx.changed() => match changed {
                    Ok(()) => {
                        let sent = *rx.borrow_and_update();
                        progress(sent);
                    }
                    Err(_) => {
                        let response = send.await?;
                        progress(total);
                        return Ok(response);
                    }
                },
            }
        }
    }
}

/// Splits an in-memory body into [`STREAM_SLICE`] pieces.
fn sliced(body: Bytes) -> BodyStream {
    let slices: Vec<io::Result<Bytes>> = (0..body.len())
        .step_by(STREAM_SLICE)
        .map(|start| Ok(body.slice(start..(start + STREAM_SLICE).min(body.len()))))
        .collect();
    Box::pin(stream::iter(slices))
}

/// Streams the whole of `source` without buffering it. A file is read
/// up to the length it had when it was measured.
async fn source_stream(source: &PartSource) -> io::Result<BodyStream> {
    match source {
        PartSource::Memory(data) => Ok(sliced(data.clone())),
        PartSource::File { path, len } => {
            let file = tokio::fs::File::open(path.as_path()).await?;
            let body: BodyStream = Box::pin(ReaderStream::with_capacity(
                file.take(*len),
                STREAM_SLICE,
            ));
            Ok(body)
        }
    }
}

/// Publishes the cumulative byte count on `tx` as each piece is handed
/// to the transport.
fn counted(
    body: BodyStream,
    tx: watch::Sender<u64>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
    let mut sent = 0u64;
    body.map(move |piece| {
        if let Ok(bytes) = &piece {
            sent += bytes.len() as u64;
            let _ = tx.send(sent);
        }
        piece
    })
}

/// Builds a part receipt from response headers. A response without an
/// `ETag` cannot be referenced at completion and is rejected.
fn receipt_from_headers(status: u16, headers: &HeaderMap) -> Result<PartReceipt, UploadError> {
    let entity_tag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| UploadError::PartTransport {
            status: Some(status),
            body: "missing ETag".into(),
        })?
        .to_string();

    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect::<BTreeMap<_, _>>();

    Ok(PartReceipt {
        entity_tag,
        headers,
    })
}

fn part_transport(e: reqwest::Error) -> UploadError {
    UploadError::PartTransport {
        status: e.status().map(|s| s.as_u16()),
        body: e.to_string(),
    }
}

impl MultipartApi for HttpClient {
    fn initiate<'a>(&'a self, path: &'a str) -> ApiFuture<'a, String> {
        Box::pin(async move {
            let url = format!("{}?uploads", self.endpoint(path));
            debug!(url = %url, "initiating multipart upload");

            let resp = self
                .request(reqwest::Method::POST, &url)
                .send()
                .await
                .map_err(|e| UploadError::Initiation(e.to_string()))?;
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();

            if !status.is_success() {
                return Err(UploadError::Initiation(format!(
                    "HTTP {}: {body}",
                    status.as_u16()
                )));
            }

            wire::parse_upload_id(&body)
        })
    }

    fn upload_part<'a>(
        &'a self,
        path: &'a str,
        session_id: &'a str,
        part_number: u32,
        body: Bytes,
        progress: &'a ProgressFn<'a>,
    ) -> ApiFuture<'a, PartReceipt> {
        Box::pin(async move {
            let request = self.request(reqwest::Method::PUT, &self.endpoint(path)).query(&[
                ("partNumber", part_number.to_string()),
                ("uploadId", session_id.to_string()),
            ]);
            trace!(path, part_number, bytes = body.len(), "sending part");

            let total = body.len() as u64;
            let resp = self
                .send_with_progress(request, total, sliced(body), progress)
                .await
                .map_err(part_transport)?;
            let status = resp.status();

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(UploadError::PartTransport {
                    status: Some(status.as_u16()),
                    body,
                });
            }

            receipt_from_headers(status.as_u16(), resp.headers())
        })
    }

    fn complete<'a>(
        &'a self,
        path: &'a str,
        session_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> ApiFuture<'a, ObjectDescriptor> {
        Box::pin(async move {
            let xml = wire::complete_request_body(parts)?;
            debug!(path, parts = parts.len(), "completing multipart upload");

            let resp = self
                .request(reqwest::Method::POST, &self.endpoint(path))
                .query(&[("uploadId", session_id)])
                .header(CONTENT_TYPE, "application/xml")
                .body(xml)
                .send()
                .await
                .map_err(|e| UploadError::Completion(e.to_string()))?;
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();

            if !status.is_success() {
                return Err(UploadError::Completion(format!(
                    "HTTP {}: {body}",
                    status.as_u16()
                )));
            }

            Ok(wire::parse_complete_response(&body))
        })
    }

    fn abort<'a>(&'a self, path: &'a str, session_id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let resp = self
                .request(reqwest::Method::DELETE, &self.endpoint(path))
                .query(&[("uploadId", session_id)])
                .send()
                .await
                .map_err(|e| UploadError::Abort {
                    status: e.status().map(|s| s.as_u16()),
                    body: e.to_string(),
                })?;
            let status = resp.status();

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(UploadError::Abort {
                    status: Some(status.as_u16()),
                    body,
                });
            }
            Ok(())
        })
    }

    fn put_object<'a>(
        &'a self,
        path: &'a str,
        source: &'a PartSource,
        progress: &'a ProgressFn<'a>,
    ) -> ApiFuture<'a, ObjectDescriptor> {
        Box::pin(async move {
            let request = self.request(reqwest::Method::PUT, &self.endpoint(path));
            let body = source_stream(source).await?;
            trace!(path, bytes = source.len(), "sending object");

            let resp = self
                .send_with_progress(request, source.len(), body, progress)
                .await
                .map_err(|e| UploadError::Put {
                    status: e.status().map(|s| s.as_u16()),
                    body: e.to_string(),
                })?;
            let status = resp.status();
            let etag = resp
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = resp.text().await.unwrap_or_default();

            if !status.is_success() {
                return Err(UploadError::Put {
                    status: Some(status.as_u16()),
                    body,
                });
            }

            Ok(wire::parse_put_response(&body, etag))
        })
    }
}

//! tus 1.0.0 client (core protocol + creation extension).
//!
//! An upload is created with `POST <endpoint>` announcing its total
//! length, then filled with sequential `PATCH` requests, each carrying
//! the offset it starts at. The server answers every `PATCH` with the new
//! offset; an upload is complete once that offset equals the length.

use std::path::{Path, PathBuf};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::Url;
use tokio::io::AsyncReadExt;

use crate::metadata::UploadMetadata;

/// Protocol version sent in every `Tus-Resumable` header.
pub const TUS_VERSION: &str = "1.0.0";

/// Default bytes per `PATCH` request (5 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

const TUS_RESUMABLE: &str = "Tus-Resumable";
const UPLOAD_LENGTH: &str = "Upload-Length";
const UPLOAD_OFFSET: &str = "Upload-Offset";
const UPLOAD_METADATA: &str = "Upload-Metadata";
const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Errors from the tus client.
#[derive(Debug, thiserror::Error)]
pub enum TusError {
    #[error("Invalid upload URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid value for header {name}: {value:?}")]
    InvalidHeaderValue { name: String, value: String },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("tus server returned HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("tus server response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("tus server sent an unparseable {name} header: {value:?}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("Upload offset mismatch: expected {expected}, server reported {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("Upload incomplete: {offset} of {size} bytes sent")]
    Incomplete { offset: u64, size: u64 },

    #[error("Failed to open {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TusError {
    /// Whether the local file disappeared before the upload started.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Self::FileOpen { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// A finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// URL of the upload resource on the tus server.
    pub url: Url,
    /// Bytes confirmed by the server.
    pub size: u64,
}

/// Client for one tus creation endpoint.
#[derive(Debug, Clone)]
pub struct TusClient {
    client: reqwest::Client,
    endpoint: Url,
    chunk_size: usize,
    headers: HeaderMap,
}

impl TusClient {
    /// Create a client for `endpoint` (e.g. `https://host/files/`).
    pub fn new(client: reqwest::Client, endpoint: &str) -> Result<Self, TusError> {
        let endpoint = Url::parse(endpoint).map_err(|e| TusError::InvalidUrl {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            endpoint,
            chunk_size: DEFAULT_CHUNK_SIZE,
            headers: HeaderMap::new(),
        })
    }

    /// Bytes per `PATCH` request; zero is bumped to one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Add a header sent on creation and status requests.
    ///
    /// `PATCH` requests keep the `Content-Type` mandated by the protocol.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self, TusError> {
        let header_value =
            HeaderValue::from_str(value).map_err(|_| TusError::InvalidHeaderValue {
                name: name.to_string(),
                value: value.to_string(),
            })?;
        self.headers.insert(name, header_value);
        Ok(self)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Announce a new upload of `length` bytes and return its URL.
    pub async fn create_upload(
        &self,
        length: u64,
        metadata: &UploadMetadata,
    ) -> Result<Url, TusError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(UPLOAD_LENGTH, length.to_string());
        if !metadata.is_empty() {
            request = request.header(UPLOAD_METADATA, metadata.to_header_value());
        }

        let response = Self::ensure_success(request.send().await?).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .ok_or(TusError::MissingHeader("Location"))?
            .to_str()
            .map_err(|_| TusError::InvalidHeader {
                name: "Location",
                value: format!("{:?}", response.headers().get(LOCATION)),
            })?;

        self.endpoint
            .join(location)
            .map_err(|e| TusError::InvalidUrl {
                url: location.to_string(),
                reason: e.to_string(),
            })
    }

    /// Send one chunk starting at `offset`; returns the server's new offset.
    pub async fn upload_chunk(
        &self,
        upload_url: &Url,
        offset: u64,
        chunk: Vec<u8>,
    ) -> Result<u64, TusError> {
        let expected = offset + chunk.len() as u64;

        let response = self
            .client
            .patch(upload_url.clone())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(UPLOAD_OFFSET, offset.to_string())
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .body(chunk)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let actual = Self::offset_header(&response)?;
        if actual != expected {
            return Err(TusError::OffsetMismatch { expected, actual });
        }
        Ok(actual)
    }

    /// Current offset of an upload, via `HEAD`.
    pub async fn offset(&self, upload_url: &Url) -> Result<u64, TusError> {
        let response = self
            .client
            .head(upload_url.clone())
            .headers(self.headers.clone())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Self::offset_header(&response)
    }

    /// Upload a whole file in `chunk_size` pieces.
    ///
    /// Succeeds only once the server-confirmed offset equals the file size.
    pub async fn upload_file(
        &self,
        path: &Path,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, TusError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|source| TusError::FileOpen {
                path: path.to_path_buf(),
                source,
            })?;
        let size = file.metadata().await?.len();

        let url = self.create_upload(size, metadata).await?;
        tracing::debug!(path = %path.display(), url = %url, size, "Created tus upload");

        let mut offset = 0u64;
        while offset < size {
            let mut chunk = Vec::with_capacity(self.chunk_size);
            (&mut file)
                .take(self.chunk_size as u64)
                .read_to_end(&mut chunk)
                .await?;
            if chunk.is_empty() {
                // File shrank after its size was announced.
                return Err(TusError::Incomplete { offset, size });
            }
            offset = self.upload_chunk(&url, offset, chunk).await?;
            tracing::trace!(url = %url, offset, size, "Uploaded chunk");
        }

        Ok(UploadReceipt { url, size: offset })
    }

    // ---- private helpers ----

    /// Pass 2xx responses through; surface the body of anything else.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TusError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(TusError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }

    fn offset_header(response: &reqwest::Response) -> Result<u64, TusError> {
        let raw = response
            .headers()
            .get(UPLOAD_OFFSET)
            .ok_or(TusError::MissingHeader(UPLOAD_OFFSET))?;
        raw.to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| TusError::InvalidHeader {
                name: UPLOAD_OFFSET,
                value: String::from_utf8_lossy(raw.as_bytes()).into_owned(),
            })
    }
}

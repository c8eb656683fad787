//! Output publishing: ship finished outputs to the job's tus endpoint.
//!
//! Defines [`OutputPublisher`], implemented by [`ManifestPublisher`] (uploads
//! what the engine's history lists) and [`ScanPublisher`] (uploads what is on
//! disk), along with [`Publisher`], the configuration-selected dispatcher.
//!
//! Both strategies are all-or-nothing per pass: the first failed upload
//! aborts the pass and files already uploaded stay uploaded.

pub mod manifest;
pub mod scan;

use std::path::{Path, PathBuf};

use relay_comfyui::history::Outputs;
use relay_core::media_type::content_type_for;
use relay_tus::{TusClient, TusError, UploadMetadata};
use reqwest::header::CONTENT_TYPE;

pub use manifest::ManifestPublisher;
pub use scan::ScanPublisher;

use crate::config::{PublishMode, WorkerConfig};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Inputs for one publish pass.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    /// tus creation endpoint.
    pub destination_url: &'a str,
    /// Job identifier, attached to every upload's metadata.
    pub job_id: &'a str,
    /// History outputs; required by the manifest strategy.
    pub outputs: Option<&'a Outputs>,
}

/// Result of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Upload URLs in upload order; never empty.
    Urls(Vec<String>),
    /// Number of files uploaded (and removed locally).
    Count(usize),
}

/// Errors that abort a publish pass.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to upload {}: {source}", path.display())]
    UploadFailed {
        path: PathBuf,
        #[source]
        source: TusError,
    },

    #[error("No output files were uploaded")]
    NoFilesUploaded,

    #[error("Output directory does not exist: {}", .0.display())]
    MissingOutputDir(PathBuf),

    #[error("Failed to scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid output destination: {0}")]
    Destination(#[source] TusError),

    #[error("No outputs were reported for the job")]
    MissingManifest,
}

/// A strategy for publishing a job's outputs.
pub trait OutputPublisher: Send + Sync {
    fn publish(
        &self,
        request: PublishRequest<'_>,
    ) -> impl std::future::Future<Output = Result<PublishOutcome, PublishError>> + Send;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// The strategy chosen by `PUBLISH_MODE`.
#[derive(Debug, Clone)]
pub enum Publisher {
    Manifest(ManifestPublisher),
    Scan(ScanPublisher),
}

impl Publisher {
    pub fn from_config(config: &WorkerConfig, client: reqwest::Client) -> Self {
        let output_dir = config.output_dir.clone();
        match config.publish_mode {
            PublishMode::Manifest => Self::Manifest(ManifestPublisher::new(
                client,
                output_dir,
                config.tus_chunk_size,
            )),
            PublishMode::Scan => {
                Self::Scan(ScanPublisher::new(client, output_dir, config.tus_chunk_size))
            }
        }
    }

    pub fn mode(&self) -> PublishMode {
        match self {
            Self::Manifest(_) => PublishMode::Manifest,
            Self::Scan(_) => PublishMode::Scan,
        }
    }
}

impl OutputPublisher for Publisher {
    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishOutcome, PublishError> {
        match self {
            Self::Manifest(publisher) => publisher.publish(request).await,
            Self::Scan(publisher) => publisher.publish(request).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared upload step
// ---------------------------------------------------------------------------

/// Upload one local file, tagging it with its content type and the job id.
async fn upload_file(
    client: &reqwest::Client,
    chunk_size: usize,
    request: &PublishRequest<'_>,
    path: &Path,
) -> Result<relay_tus::UploadReceipt, TusError> {
    let content_type = content_type_for(path);
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let tus = TusClient::new(client.clone(), request.destination_url)?
        .with_chunk_size(chunk_size)
        .with_header(CONTENT_TYPE, content_type)?;
    let metadata = UploadMetadata::new()
        .with("filename", filename)
        .with("filetype", content_type)
        .with("job_id", request.job_id);

    tracing::info!(
        path = %path.display(),
        content_type,
        job_id = request.job_id,
        "Uploading output file",
    );
    tus.upload_file(path, &metadata).await
}

/// Reject unusable destinations before touching any file.
fn check_destination(client: &reqwest::Client, url: &str) -> Result<(), PublishError> {
    TusClient::new(client.clone(), url)
        .map(|_| ())
        .map_err(PublishError::Destination)
}

//! Directory-scan publishing: upload every file that landed under the
//! output root, deleting each one once its upload is confirmed.

use std::path::{Path, PathBuf};

use super::{
    check_destination, upload_file, OutputPublisher, PublishError, PublishOutcome, PublishRequest,
};

/// Name fragment marking files that are not real outputs.
const PLACEHOLDER_MARKER: &str = "placeholder";

/// Publishes whatever files exist under `output_dir`.
#[derive(Debug, Clone)]
pub struct ScanPublisher {
    client: reqwest::Client,
    output_dir: PathBuf,
    chunk_size: usize,
}

impl ScanPublisher {
    pub fn new(client: reqwest::Client, output_dir: PathBuf, chunk_size: usize) -> Self {
        Self {
            client,
            output_dir,
            chunk_size,
        }
    }
}

impl OutputPublisher for ScanPublisher {
    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishOutcome, PublishError> {
        check_destination(&self.client, request.destination_url)?;

        let is_dir = tokio::fs::metadata(&self.output_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(PublishError::MissingOutputDir(self.output_dir.clone()));
        }

        let files = collect_output_files(&self.output_dir).await?;
        if files.is_empty() {
            tracing::info!(dir = %self.output_dir.display(), "No output files found");
            return Ok(PublishOutcome::Count(0));
        }
        tracing::info!(count = files.len(), "Found output files to upload");

        let mut uploaded = 0;
        for path in &files {
            match upload_file(&self.client, self.chunk_size, &request, path).await {
                Ok(receipt) => {
                    tracing::info!(path = %path.display(), url = %receipt.url, "Uploaded output file");
                    uploaded += 1;
                    if let Err(e) = tokio::fs::remove_file(path).await {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to delete uploaded file");
                    }
                }
                Err(e) if e.is_missing_file() => {
                    tracing::info!(path = %path.display(), "Output file vanished before upload, skipping");
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Output upload failed");
                    return Err(PublishError::UploadFailed {
                        path: path.clone(),
                        source: e,
                    });
                }
            }
        }

        Ok(PublishOutcome::Count(uploaded))
    }
}

/// Whether a file or directory name is skipped by the scan.
pub fn is_excluded(name: &str) -> bool {
    name.starts_with('.')
        || name.starts_with('_')
        || name.to_ascii_lowercase().contains(PLACEHOLDER_MARKER)
}

/// Every publishable file under `root`, depth-first, each directory's
/// entries in name order.
pub async fn collect_output_files(root: &Path) -> Result<Vec<PathBuf>, PublishError> {
    let mut files = Vec::new();
    collect_recursive(root, &mut files).await?;
    Ok(files)
}

async fn collect_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), PublishError> {
    let scan_error = |source| PublishError::Scan {
        path: current.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(current).await.map_err(scan_error)?;
    let mut listed = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(scan_error)? {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_excluded(&name) {
            continue;
        }
        let file_type = entry.file_type().await.map_err(scan_error)?;
        listed.push((name, entry.path(), file_type));
    }
    listed.sort_by(|a, b| a.0.cmp(&b.0));

    for (_, path, file_type) in listed {
        if file_type.is_dir() {
            Box::pin(collect_recursive(&path, files)).await?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

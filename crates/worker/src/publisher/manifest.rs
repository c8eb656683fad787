//! Manifest publishing: upload the images listed in the engine's history
//! outputs. Local files are left in place.

use std::path::PathBuf;

use relay_comfyui::history::{output_images, Outputs};

use super::{
    check_destination, upload_file, OutputPublisher, PublishError, PublishOutcome, PublishRequest,
};

/// Publishes the images named by a history `outputs` mapping.
#[derive(Debug, Clone)]
pub struct ManifestPublisher {
    client: reqwest::Client,
    output_dir: PathBuf,
    chunk_size: usize,
}

impl ManifestPublisher {
    pub fn new(client: reqwest::Client, output_dir: PathBuf, chunk_size: usize) -> Self {
        Self {
            client,
            output_dir,
            chunk_size,
        }
    }

    /// Local paths of every listed image that exists on disk.
    async fn candidate_paths(&self, outputs: &Outputs) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for image in output_images(outputs) {
            let path = self.output_dir.join(&image.subfolder).join(&image.filename);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                paths.push(path);
            } else {
                tracing::warn!(path = %path.display(), "Listed output image does not exist, skipping");
            }
        }
        paths
    }
}

impl OutputPublisher for ManifestPublisher {
    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishOutcome, PublishError> {
        check_destination(&self.client, request.destination_url)?;
        let outputs = request.outputs.ok_or(PublishError::MissingManifest)?;

        let mut urls = Vec::new();
        for path in self.candidate_paths(outputs).await {
            let receipt = upload_file(&self.client, self.chunk_size, &request, &path)
                .await
                .map_err(|source| {
                    tracing::error!(path = %path.display(), error = %source, "Output upload failed");
                    PublishError::UploadFailed {
                        path: path.clone(),
                        source,
                    }
                })?;
            tracing::info!(path = %path.display(), url = %receipt.url, "Uploaded output image");
            urls.push(receipt.url.to_string());
        }

        if urls.is_empty() {
            return Err(PublishError::NoFilesUploaded);
        }
        Ok(PublishOutcome::Urls(urls))
    }
}

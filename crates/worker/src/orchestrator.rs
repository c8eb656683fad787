//! Job orchestrator: runs one job from payload validation to published
//! outputs and folds every failure into a [`JobResult`].
//!
//! ```text
//! validate -> probe -> stage input -> submit -> poll -> publish
//! validate -> (dry run) stage into output root -> delay -> publish
//! ```
//!
//! Stages run strictly in order and are never retried here; the first
//! failing stage ends the job with its error message.

use relay_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use relay_comfyui::history::Outputs;
use relay_comfyui::poll::{wait_for_outputs, PollError};
use relay_comfyui::probe::wait_until_available;
use relay_core::error::ValidationError;
use relay_core::job::{validate_input, JobEnvelope, JobRequest};
use relay_core::recipe::{resolve_recipe, RecipeError};
use relay_core::result::JobResult;
use serde_json::{json, Map};
use tracing::Instrument;

use crate::config::{PublishMode, StagingMode, WorkerConfig};
use crate::publisher::scan::is_excluded;
use crate::publisher::{OutputPublisher, PublishError, PublishOutcome, PublishRequest, Publisher};
use crate::stager::{
    download_asset, download_to_path, download_to_path_as, filename_from_url, random_filename,
    upload_to_engine, StageError,
};

/// Output node id used for the manifest synthesised by a dry run.
const DRY_RUN_NODE: &str = "dry_run";

/// Any stage failure.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error("Error queuing workflow: {0}")]
    Submit(#[source] ComfyUIApiError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Owns the engine client, HTTP client and publisher for the process.
pub struct JobOrchestrator {
    config: WorkerConfig,
    api: ComfyUIApi,
    client: reqwest::Client,
    publisher: Publisher,
}

impl JobOrchestrator {
    /// Build the shared HTTP client (with the configured timeout) and the
    /// components using it.
    pub fn new(config: WorkerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        let api = ComfyUIApi::with_client(client.clone(), config.comfy_url.clone());
        let publisher = Publisher::from_config(&config, client.clone());
        Ok(Self {
            config,
            api,
            client,
            publisher,
        })
    }

    /// Run one job to completion. Never fails; errors become
    /// `{"error": ...}` results.
    pub async fn handle(&self, envelope: &JobEnvelope) -> JobResult {
        let span = tracing::info_span!("job", job_id = %envelope.id);
        let outcome = self.run(envelope).instrument(span.clone()).await;

        span.in_scope(|| match outcome {
            Ok(PublishOutcome::Urls(urls)) => {
                tracing::info!(count = urls.len(), "Job finished");
                JobResult::published(urls, self.config.refresh_worker)
            }
            Ok(PublishOutcome::Count(count)) => {
                tracing::info!(count, "Job finished");
                JobResult::counted(count, self.config.refresh_worker)
            }
            Err(e) => {
                tracing::error!(error = %e, "Job failed");
                JobResult::error(e.to_string())
            }
        })
    }

    async fn run(&self, envelope: &JobEnvelope) -> Result<PublishOutcome, JobError> {
        let request = validate_input(envelope.input.as_ref(), self.config.params_policy())?;
        tracing::info!(
            stage = "validate",
            has_input = request.source_asset_url.is_some(),
            embedded_workflow = request.workflow.is_some(),
            "Job input is valid",
        );

        if self.config.dry_run {
            return self.dry_run(&envelope.id, &request).await;
        }

        if !wait_until_available(&self.api, &self.config.probe_policy()).await {
            tracing::warn!(
                stage = "probe",
                api_url = %self.api.api_url(),
                "ComfyUI did not answer the availability probe; proceeding regardless",
            );
        }

        let staged = self.stage_input(&request).await?;

        let mut recipe = resolve_recipe(&request, &self.config.recipe_source).await?;
        if let Some(filename) = &staged {
            let updated = recipe.inject_input_image(filename);
            if updated == 0 {
                tracing::warn!(filename, "Workflow has no image loader node for the input asset");
            } else {
                tracing::debug!(filename, nodes = updated, "Injected input asset into workflow");
            }
        }

        let submitted = self
            .api
            .submit_workflow(&recipe)
            .await
            .map_err(JobError::Submit)?;
        tracing::info!(
            stage = "submit",
            prompt_id = %submitted.prompt_id,
            queue_number = submitted.number,
            "Queued workflow",
        );

        let outputs = wait_for_outputs(
            &self.api,
            &submitted.prompt_id,
            &self.config.polling_policy(),
        )
        .await?;

        let outcome = self
            .publisher
            .publish(PublishRequest {
                destination_url: &request.destination_url,
                job_id: &envelope.id,
                outputs: Some(&outputs),
            })
            .await?;
        Ok(outcome)
    }

    /// Make the input asset visible to the engine and return the filename
    /// recipes should reference.
    async fn stage_input(&self, request: &JobRequest) -> Result<Option<String>, StageError> {
        let Some(url) = request.source_asset_url.as_deref() else {
            return Ok(None);
        };

        let filename = match self.config.staging_mode {
            StagingMode::EngineUpload => {
                let asset = download_asset(&self.client, url).await?;
                upload_to_engine(&self.api, Some(asset)).await?
            }
            StagingMode::LocalPath => {
                let path = download_to_path(&self.client, url, &self.config.input_dir).await?;
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            }
        };
        tracing::info!(stage = "stage", filename, "Input asset staged");
        Ok(Some(filename))
    }

    /// Skip the engine: treat the input asset itself as the job's output.
    async fn dry_run(&self, job_id: &str, request: &JobRequest) -> Result<PublishOutcome, JobError> {
        let staged = match request.source_asset_url.as_deref() {
            Some(url) => {
                let filename = dry_run_filename(url);
                Some(
                    download_to_path_as(&self.client, url, &self.config.output_dir, &filename)
                        .await?,
                )
            }
            None => None,
        };

        tracing::info!(
            stage = "dry_run",
            delay_ms = self.config.dry_run_delay.as_millis() as u64,
            "Dry run: skipping generation",
        );
        tokio::time::sleep(self.config.dry_run_delay).await;

        let manifest = match self.publisher.mode() {
            PublishMode::Manifest => Some(dry_run_manifest(
                staged
                    .as_deref()
                    .and_then(|path| path.file_name())
                    .map(|name| name.to_string_lossy().into_owned()),
            )),
            PublishMode::Scan => None,
        };

        let outcome = self
            .publisher
            .publish(PublishRequest {
                destination_url: &request.destination_url,
                job_id,
                outputs: manifest.as_ref(),
            })
            .await?;
        Ok(outcome)
    }
}

/// Name for the dry-run copy of the input in the output root.
///
/// Names the directory scan would skip are replaced by a random one.
fn dry_run_filename(url: &str) -> String {
    let filename = filename_from_url(url);
    if is_excluded(&filename) {
        let renamed = random_filename(&filename);
        tracing::info!(original = %filename, renamed = %renamed, "Renaming dry-run input so it is published");
        renamed
    } else {
        filename
    }
}

/// History-shaped outputs listing at most the staged file.
fn dry_run_manifest(filename: Option<String>) -> Outputs {
    let mut outputs = Map::new();
    if let Some(filename) = filename {
        outputs.insert(
            DRY_RUN_NODE.to_string(),
            json!({"images": [{"filename": filename, "subfolder": "", "type": "output"}]}),
        );
    }
    outputs
}

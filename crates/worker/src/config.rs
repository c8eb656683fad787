//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use relay_comfyui::api::normalize_base_url;
use relay_comfyui::retry::RetryPolicy;
use relay_core::job::ParamsPolicy;
use relay_core::recipe::RecipeSource;
use relay_tus::client::DEFAULT_CHUNK_SIZE;

/// Errors raised while reading the worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Where finished outputs are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Walk the output root and upload whatever landed on disk.
    Scan,
    /// Upload only the images listed in the engine's history outputs.
    Manifest,
}

/// How the input asset reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingMode {
    /// Multipart upload to the engine's `/upload/image` endpoint.
    EngineUpload,
    /// Download straight into the engine's input directory.
    LocalPath,
}

/// Worker configuration loaded from environment variables.
///
/// Every field has a default matching the container image layout, so an
/// empty environment yields a working configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Engine base URL (from `COMFY_HOST`).
    pub comfy_url: String,
    pub probe_interval_ms: u64,
    pub probe_max_retries: u32,
    pub polling_interval_ms: u64,
    pub polling_max_retries: u32,
    pub output_dir: PathBuf,
    pub input_dir: PathBuf,
    pub recipe_source: RecipeSource,
    pub publish_mode: PublishMode,
    pub staging_mode: StagingMode,
    pub tus_chunk_size: usize,
    pub http_timeout: Duration,
    pub refresh_worker: bool,
    pub dry_run: bool,
    pub dry_run_delay: Duration,
    pub log_level: String,
    pub log_sink_url: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                           | Default                    |
    /// |-----------------------------------|----------------------------|
    /// | `COMFY_HOST`                      | `127.0.0.1:8188`           |
    /// | `COMFY_API_AVAILABLE_INTERVAL_MS` | `50`                       |
    /// | `COMFY_API_AVAILABLE_MAX_RETRIES` | `500`                      |
    /// | `COMFY_POLLING_INTERVAL_MS`       | `250`                      |
    /// | `COMFY_POLLING_MAX_RETRIES`       | `500`                      |
    /// | `COMFY_OUTPUT_PATH`               | `/comfyui/output`          |
    /// | `COMFY_INPUT_PATH`                | `/comfyui/input`           |
    /// | `WORKFLOW_PATH`                   | `/workflows/workflow.json` |
    /// | `WORKFLOW_DIR`                    | unset                      |
    /// | `PUBLISH_MODE`                    | `scan`                     |
    /// | `STAGING_MODE`                    | `upload`                   |
    /// | `TUS_CHUNK_SIZE`                  | `5242880`                  |
    /// | `HTTP_TIMEOUT_SECS`               | `300`                      |
    /// | `REFRESH_WORKER`                  | `false`                    |
    /// | `DRY_RUN`                         | `false`                    |
    /// | `DRY_RUN_DELAY_MS`                | `3000`                     |
    /// | `LOG_LEVEL`                       | `info`                     |
    /// | `LOG_SINK_URL`                    | unset                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let comfy_url =
            normalize_base_url(&get("COMFY_HOST").unwrap_or_else(|| "127.0.0.1:8188".into()));

        let recipe_source = match get("WORKFLOW_DIR") {
            Some(dir) => RecipeSource::ByParams(PathBuf::from(dir)),
            None => RecipeSource::Static(PathBuf::from(
                get("WORKFLOW_PATH").unwrap_or_else(|| "/workflows/workflow.json".into()),
            )),
        };

        let publish_mode = match get("PUBLISH_MODE").map(|v| v.to_ascii_lowercase()) {
            None => PublishMode::Scan,
            Some(v) if v == "scan" => PublishMode::Scan,
            Some(v) if v == "manifest" => PublishMode::Manifest,
            Some(v) => return Err(invalid("PUBLISH_MODE", "one of scan, manifest", v)),
        };

        let staging_mode = match get("STAGING_MODE").map(|v| v.to_ascii_lowercase()) {
            None => StagingMode::EngineUpload,
            Some(v) if v == "upload" => StagingMode::EngineUpload,
            Some(v) if v == "local" => StagingMode::LocalPath,
            Some(v) => return Err(invalid("STAGING_MODE", "one of upload, local", v)),
        };

        let tus_chunk_size: usize = parse_or(&get, "TUS_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        if tus_chunk_size == 0 {
            return Err(invalid("TUS_CHUNK_SIZE", "a positive integer", "0".into()));
        }

        Ok(Self {
            comfy_url,
            probe_interval_ms: parse_or(&get, "COMFY_API_AVAILABLE_INTERVAL_MS", 50)?,
            probe_max_retries: parse_or(&get, "COMFY_API_AVAILABLE_MAX_RETRIES", 500)?,
            polling_interval_ms: parse_or(&get, "COMFY_POLLING_INTERVAL_MS", 250)?,
            polling_max_retries: parse_or(&get, "COMFY_POLLING_MAX_RETRIES", 500)?,
            output_dir: PathBuf::from(
                get("COMFY_OUTPUT_PATH").unwrap_or_else(|| "/comfyui/output".into()),
            ),
            input_dir: PathBuf::from(
                get("COMFY_INPUT_PATH").unwrap_or_else(|| "/comfyui/input".into()),
            ),
            recipe_source,
            publish_mode,
            staging_mode,
            tus_chunk_size,
            http_timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 300)?),
            refresh_worker: parse_bool(&get, "REFRESH_WORKER", false)?,
            dry_run: parse_bool(&get, "DRY_RUN", false)?,
            dry_run_delay: Duration::from_millis(parse_or(&get, "DRY_RUN_DELAY_MS", 3000)?),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_sink_url: get("LOG_SINK_URL"),
        })
    }

    /// Retry budget for the availability probe.
    pub fn probe_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(self.probe_max_retries, self.probe_interval_ms)
    }

    /// Retry budget for completion polling.
    pub fn polling_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(self.polling_max_retries, self.polling_interval_ms)
    }

    /// `params` is mandatory when recipes are selected by parameters.
    pub fn params_policy(&self) -> ParamsPolicy {
        match self.recipe_source {
            RecipeSource::ByParams(_) => ParamsPolicy::Required,
            RecipeSource::Static(_) => ParamsPolicy::Optional,
        }
    }
}

fn invalid(var: &'static str, expected: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid {
        var,
        expected,
        value,
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| invalid(var, "a non-negative integer", raw)),
    }
}

fn parse_bool<G>(get: &G, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(invalid(var, "a boolean (true/false/1/0/yes/no)", v)),
        },
    }
}

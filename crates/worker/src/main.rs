//! `relay-worker` -- runs one ComfyUI job per invocation.
//!
//! Reads a job envelope `{"id": "...", "input": {...}}` from stdin and
//! writes the job result JSON to stdout. Logs go to stderr (and to
//! `LOG_SINK_URL` when set). See [`WorkerConfig::from_env`] for the
//! recognised environment variables.

use std::process::ExitCode;

use relay_core::job::JobEnvelope;
use relay_core::result::JobResult;
use relay_worker::config::WorkerConfig;
use relay_worker::logging;
use relay_worker::orchestrator::JobOrchestrator;
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            let logging = logging::init("info", None);
            tracing::error!(error = %e, "Invalid configuration");
            emit(&JobResult::error(e.to_string()));
            logging.shutdown().await;
            return ExitCode::FAILURE;
        }
    };

    let logging = logging::init(&config.log_level, config.log_sink_url.as_deref());
    tracing::info!(
        comfy_url = %config.comfy_url,
        publish_mode = ?config.publish_mode,
        staging_mode = ?config.staging_mode,
        dry_run = config.dry_run,
        "Starting relay-worker",
    );

    let code = run(config).await;
    logging.shutdown().await;
    code
}

async fn run(config: WorkerConfig) -> ExitCode {
    let mut raw = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut raw).await {
        tracing::error!(error = %e, "Failed to read job envelope from stdin");
        return ExitCode::FAILURE;
    }

    let envelope: JobEnvelope = match serde_json::from_str(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(error = %e, "Job envelope is not valid JSON");
            emit(&JobResult::error(format!("Invalid job envelope: {e}")));
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = match JobOrchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            emit(&JobResult::error(e.to_string()));
            return ExitCode::FAILURE;
        }
    };

    let result = orchestrator.handle(&envelope).await;
    if result.should_recycle() {
        tracing::info!("Worker refresh requested");
    }
    emit(&result);
    ExitCode::SUCCESS
}

fn emit(result: &JobResult) {
    match serde_json::to_string(result) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize job result"),
    }
}

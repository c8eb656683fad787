//! End-to-end job tests: mocked ComfyUI, asset host and tus server, real
//! filesystem under a temporary directory.

use std::collections::HashMap;
use std::path::Path;

use httpmock::MockServer;
use serde_json::{json, Value};

use relay_core::job::JobEnvelope;
use relay_core::result::JobResult;
use relay_worker::config::WorkerConfig;
use relay_worker::orchestrator::JobOrchestrator;

struct Fixture {
    _dir: tempfile::TempDir,
    output_dir: std::path::PathBuf,
    input_dir: std::path::PathBuf,
    workflow_path: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("output");
        let input_dir = dir.path().join("input");
        let workflow_path = dir.path().join("workflow.json");
        std::fs::create_dir_all(&output_dir).unwrap();
        std::fs::write(
            &workflow_path,
            json!({
                "1": {"class_type": "LoadImage", "inputs": {"image": "example.png"}},
                "9": {"class_type": "SaveImage", "inputs": {"images": ["1", 0]}},
            })
            .to_string(),
        )
        .unwrap();
        Self {
            _dir: dir,
            output_dir,
            input_dir,
            workflow_path,
        }
    }

    fn orchestrator(&self, engine: &MockServer, extra: &[(&str, &str)]) -> JobOrchestrator {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("COMFY_HOST".into(), engine.base_url()),
            ("COMFY_API_AVAILABLE_INTERVAL_MS".into(), "1".into()),
            ("COMFY_API_AVAILABLE_MAX_RETRIES".into(), "3".into()),
            ("COMFY_POLLING_INTERVAL_MS".into(), "1".into()),
            ("COMFY_POLLING_MAX_RETRIES".into(), "5".into()),
            ("COMFY_OUTPUT_PATH".into(), path_str(&self.output_dir)),
            ("COMFY_INPUT_PATH".into(), path_str(&self.input_dir)),
            ("WORKFLOW_PATH".into(), path_str(&self.workflow_path)),
            ("HTTP_TIMEOUT_SECS".into(), "10".into()),
            ("DRY_RUN_DELAY_MS".into(), "1".into()),
        ]);
        for (key, value) in extra {
            vars.insert(key.to_string(), value.to_string());
        }
        let config = WorkerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        JobOrchestrator::new(config).unwrap()
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn envelope(input: Value) -> JobEnvelope {
    serde_json::from_value(json!({"id": "job-42", "input": input})).unwrap()
}

async fn mock_engine_ready(engine: &MockServer, outputs: Value) {
    engine
        .mock_async(|when, then| {
            when.method("GET").path("/");
            then.status(200);
        })
        .await;
    engine
        .mock_async(|when, then| {
            when.method("POST").path("/prompt");
            then.status(200).json_body(json!({"prompt_id": "p1", "number": 0}));
        })
        .await;
    engine
        .mock_async(|when, then| {
            when.method("GET").path("/history/p1");
            then.status(200).json_body(json!({"p1": {"outputs": outputs}}));
        })
        .await;
}

async fn mock_tus_upload(tus: &MockServer, id: &str, length: usize) {
    let location = format!("/files/{id}");
    tus.mock_async(|when, then| {
        when.method("POST")
            .path("/files/")
            .header("Upload-Length", length.to_string());
        then.status(201).header("Location", location.as_str());
    })
    .await;
    tus.mock_async(|when, then| {
        when.method("PATCH").path(location.as_str());
        then.status(204).header("Upload-Offset", length.to_string());
    })
    .await;
}

// ---------------------------------------------------------------------------
// Test: manifest mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manifest_job_without_input_reports_every_url() {
    let fixture = Fixture::new();
    std::fs::write(fixture.output_dir.join("img_1.png"), "1").unwrap();
    std::fs::write(fixture.output_dir.join("img_2.png"), "22").unwrap();
    std::fs::write(fixture.output_dir.join("img_3.png"), "333").unwrap();

    let engine = MockServer::start_async().await;
    mock_engine_ready(
        &engine,
        json!({"9": {"images": [
            {"filename": "img_1.png", "subfolder": "", "type": "output"},
            {"filename": "img_2.png", "subfolder": "", "type": "output"},
            {"filename": "img_3.png", "subfolder": "", "type": "output"},
        ]}}),
    )
    .await;

    let tus = MockServer::start_async().await;
    mock_tus_upload(&tus, "f1", 1).await;
    mock_tus_upload(&tus, "f2", 2).await;
    mock_tus_upload(&tus, "f3", 3).await;

    let orchestrator = fixture.orchestrator(&engine, &[("PUBLISH_MODE", "manifest")]);
    let result = orchestrator
        .handle(&envelope(json!({"input": null, "output": tus.url("/files/")})))
        .await;

    let expected = vec![tus.url("/files/f1"), tus.url("/files/f2"), tus.url("/files/f3")];
    assert_eq!(
        result,
        JobResult::Published {
            status: relay_core::result::JobStatus::Success,
            message: expected[0].clone(),
            all_urls: expected,
            refresh_worker: false,
        }
    );
}

// ---------------------------------------------------------------------------
// Test: scan mode with local staging
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scan_job_stages_input_and_uploads_outputs() {
    let fixture = Fixture::new();

    let assets = MockServer::start_async().await;
    assets
        .mock_async(|when, then| {
            when.method("GET").path("/bucket/photo.png");
            then.status(200).body("source-image");
        })
        .await;

    let engine = MockServer::start_async().await;
    engine
        .mock_async(|when, then| {
            when.method("GET").path("/");
            then.status(200);
        })
        .await;
    let submit = engine
        .mock_async(|when, then| {
            when.method("POST")
                .path("/prompt")
                .body_contains(r#""image":"photo.png""#);
            then.status(200).json_body(json!({"prompt_id": "p1"}));
        })
        .await;
    engine
        .mock_async(|when, then| {
            when.method("GET").path("/history/p1");
            then.status(200)
                .json_body(json!({"p1": {"outputs": {"9": {"images": []}}}}));
        })
        .await;
    // The engine "wrote" these while the prompt ran.
    std::fs::create_dir_all(fixture.output_dir.join("batch_output")).unwrap();
    std::fs::write(fixture.output_dir.join("batch_output/a.png"), "aaaa").unwrap();
    std::fs::write(fixture.output_dir.join("report.txt"), "rrrrrrr").unwrap();

    let tus = MockServer::start_async().await;
    mock_tus_upload(&tus, "a", 4).await;
    mock_tus_upload(&tus, "report", 7).await;

    let orchestrator = fixture.orchestrator(
        &engine,
        &[("STAGING_MODE", "local"), ("REFRESH_WORKER", "true")],
    );
    let result = orchestrator
        .handle(&envelope(json!({
            "input": assets.url("/bucket/photo.png?X-Amz-Signature=abc"),
            "output": tus.url("/files/"),
        })))
        .await;

    assert_eq!(result, JobResult::counted(2, true));
    submit.assert_async().await;
    assert_eq!(
        std::fs::read(fixture.input_dir.join("photo.png")).unwrap(),
        b"source-image"
    );
    assert!(!fixture.output_dir.join("batch_output/a.png").exists());
    assert!(!fixture.output_dir.join("report.txt").exists());
}

#[tokio::test]
async fn engine_upload_staging_posts_multipart_asset() {
    let fixture = Fixture::new();

    let assets = MockServer::start_async().await;
    assets
        .mock_async(|when, then| {
            when.method("GET").path("/photo.jpg");
            then.status(200).body("jpeg");
        })
        .await;

    let engine = MockServer::start_async().await;
    let upload = engine
        .mock_async(|when, then| {
            when.method("POST")
                .path("/upload/image")
                .body_contains("jpeg");
            then.status(200).json_body(json!({"name": "x.jpg"}));
        })
        .await;
    mock_engine_ready(&engine, json!({"9": {"images": []}})).await;

    let tus = MockServer::start_async().await;
    let orchestrator = fixture.orchestrator(&engine, &[]);
    let result = orchestrator
        .handle(&envelope(json!({
            "input": assets.url("/photo.jpg"),
            "output": tus.url("/files/"),
        })))
        .await;

    assert_eq!(result, JobResult::counted(0, false));
    upload.assert_async().await;
}

// ---------------------------------------------------------------------------
// Test: failures become error results
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_payload_fails_before_any_request() {
    let fixture = Fixture::new();
    let engine = MockServer::start_async().await;
    let probe = engine
        .mock_async(|when, then| {
            when.method("GET").path("/");
            then.status(200);
        })
        .await;

    let orchestrator = fixture.orchestrator(&engine, &[]);
    let result = orchestrator
        .handle(&envelope(json!({"input": "http://x/a.png"})))
        .await;

    assert_eq!(
        result,
        JobResult::error("'output' must be a string containing a presigned URL")
    );
    probe.assert_hits_async(0).await;
}

#[tokio::test]
async fn missing_params_are_rejected_when_recipes_are_parameterized() {
    let fixture = Fixture::new();
    let engine = MockServer::start_async().await;
    let orchestrator = fixture.orchestrator(&engine, &[("WORKFLOW_DIR", "/workflows")]);

    let result = orchestrator
        .handle(&envelope(json!({"output": "http://tus/files/"})))
        .await;

    assert_eq!(result, JobResult::error("Missing 'params' parameter"));
}

#[tokio::test]
async fn poll_timeout_is_reported() {
    let fixture = Fixture::new();
    let engine = MockServer::start_async().await;
    mock_engine_ready(&engine, json!({})).await;

    let orchestrator = fixture.orchestrator(&engine, &[]);
    let result = orchestrator
        .handle(&envelope(json!({"output": "http://tus/files/"})))
        .await;

    assert_eq!(
        result,
        JobResult::error("Max retries reached while waiting for image generation")
    );
}

#[tokio::test]
async fn unreachable_engine_still_attempts_submission() {
    let fixture = Fixture::new();
    let engine = MockServer::start_async().await;
    let probe = engine
        .mock_async(|when, then| {
            when.method("GET").path("/");
            then.status(503);
        })
        .await;
    let submit = engine
        .mock_async(|when, then| {
            when.method("POST").path("/prompt");
            then.status(500).body("queue full");
        })
        .await;

    let orchestrator = fixture.orchestrator(&engine, &[]);
    let result = orchestrator
        .handle(&envelope(json!({"output": "http://tus/files/"})))
        .await;

    probe.assert_hits_async(3).await;
    submit.assert_async().await;
    let JobResult::Error { error } = result else {
        panic!("expected an error result");
    };
    assert!(error.starts_with("Error queuing workflow: "), "{error}");
}

#[tokio::test]
async fn embedded_workflow_replaces_file_recipe() {
    let fixture = Fixture::new();
    let engine = MockServer::start_async().await;
    let submit = engine
        .mock_async(|when, then| {
            when.method("POST")
                .path("/prompt")
                .json_body(json!({"prompt": {"5": {"class_type": "EmptyLatentImage", "inputs": {}}}}));
            then.status(200).json_body(json!({"prompt_id": "p1"}));
        })
        .await;
    engine
        .mock_async(|when, then| {
            when.method("GET").path("/history/p1");
            then.status(200)
                .json_body(json!({"p1": {"outputs": {"9": {"images": []}}}}));
        })
        .await;

    let tus = MockServer::start_async().await;
    let orchestrator = fixture.orchestrator(&engine, &[("WORKFLOW_PATH", "/does/not/exist.json")]);
    let result = orchestrator
        .handle(&envelope(json!({
            "output": tus.url("/files/"),
            "workflow": {"5": {"class_type": "EmptyLatentImage", "inputs": {}}},
        })))
        .await;

    assert_eq!(result, JobResult::counted(0, false));
    submit.assert_async().await;
}

// ---------------------------------------------------------------------------
// Test: dry run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dry_run_publishes_the_input_without_touching_the_engine() {
    let fixture = Fixture::new();

    let assets = MockServer::start_async().await;
    assets
        .mock_async(|when, then| {
            when.method("GET").path("/in/cat.png");
            then.status(200).body("meow");
        })
        .await;

    // No engine routes are mocked: any engine call would fail the job.
    let engine = MockServer::start_async().await;

    let tus = MockServer::start_async().await;
    mock_tus_upload(&tus, "cat", 4).await;

    let orchestrator = fixture.orchestrator(&engine, &[("DRY_RUN", "true")]);
    let result = orchestrator
        .handle(&envelope(json!({
            "input": assets.url("/in/cat.png"),
            "output": tus.url("/files/"),
        })))
        .await;

    assert_eq!(result, JobResult::counted(1, false));
    assert!(!fixture.output_dir.join("cat.png").exists());
}

#[tokio::test]
async fn dry_run_publishes_inputs_whose_name_the_scan_would_skip() {
    let fixture = Fixture::new();

    let assets = MockServer::start_async().await;
    assets
        .mock_async(|when, then| {
            when.method("GET").path("/in/_cat.png");
            then.status(200).body("meow");
        })
        .await;

    let engine = MockServer::start_async().await;
    let tus = MockServer::start_async().await;
    mock_tus_upload(&tus, "cat", 4).await;

    let orchestrator = fixture.orchestrator(&engine, &[("DRY_RUN", "true")]);
    let result = orchestrator
        .handle(&envelope(json!({
            "input": assets.url("/in/_cat.png"),
            "output": tus.url("/files/"),
        })))
        .await;

    assert_eq!(result, JobResult::counted(1, false));
    assert_eq!(std::fs::read_dir(&fixture.output_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn dry_run_in_manifest_mode_reports_the_staged_file() {
    let fixture = Fixture::new();

    let assets = MockServer::start_async().await;
    assets
        .mock_async(|when, then| {
            when.method("GET").path("/in/cat.png");
            then.status(200).body("meow");
        })
        .await;

    let engine = MockServer::start_async().await;
    let tus = MockServer::start_async().await;
    mock_tus_upload(&tus, "cat", 4).await;

    let orchestrator = fixture.orchestrator(
        &engine,
        &[("DRY_RUN", "yes"), ("PUBLISH_MODE", "manifest")],
    );
    let result = orchestrator
        .handle(&envelope(json!({
            "input": assets.url("/in/cat.png"),
            "output": tus.url("/files/"),
        })))
        .await;

    assert_eq!(result, JobResult::published(vec![tus.url("/files/cat")], false));
}

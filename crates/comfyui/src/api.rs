//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the four endpoints the worker consumes (health, asset upload,
//! workflow submission, history retrieval) using [`reqwest`].

use std::time::Duration;

use relay_core::recipe::GenerationRecipe;
use serde_json::Value;

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue, when reported.
    pub number: Option<i64>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// `/prompt` answered 2xx but without a `prompt_id`.
    #[error("ComfyUI response did not contain a 'prompt_id'")]
    MissingPromptId,
}

/// Turn a `COMFY_HOST` value into a base URL.
///
/// Bare `host:port` values get an `http://` scheme; trailing slashes are
/// removed so endpoint paths can be appended directly.
pub fn normalize_base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

impl ComfyUIApi {
    /// Create a new API client with a per-request timeout.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: String, timeout: Duration) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, api_url })
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// HTTP API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Single health check: `GET /` answering exactly `200`.
    pub async fn is_available(&self) -> Result<bool, ComfyUIApiError> {
        let response = self.client.get(format!("{}/", self.api_url)).send().await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }

    /// Upload an input image into ComfyUI's input directory.
    ///
    /// Sends a multipart `POST /upload/image` with the `image` file part and
    /// `overwrite=true`, so re-running a job replaces the previous file.
    pub async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the recipe wrapped as `{"prompt": ...}`
    /// and returns the server-assigned `prompt_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &GenerationRecipe,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({ "prompt": workflow });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let parsed: Value = Self::parse_response(response).await?;
        let prompt_id = parsed
            .get("prompt_id")
            .and_then(Value::as_str)
            .ok_or(ComfyUIApiError::MissingPromptId)?;

        Ok(SubmitResponse {
            prompt_id: prompt_id.to_string(),
            number: parsed.get("number").and_then(Value::as_i64),
        })
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request.  The entry keyed by
    /// `prompt_id` appears once execution has finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

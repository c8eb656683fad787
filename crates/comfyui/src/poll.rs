//! Completion poller: waits for a submitted prompt to produce outputs.

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::{completed_outputs, Outputs};
use crate::retry::{retry_until, Attempt, RetryError, RetryPolicy};

/// Errors from [`wait_for_outputs`].
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The history entry never gained outputs within the budget.
    #[error("Max retries reached while waiting for image generation")]
    Timeout { attempts: u32 },

    /// A history request failed or returned an unparseable body.
    #[error("Error waiting for image generation: {0}")]
    Polling(#[source] ComfyUIApiError),
}

/// Poll `GET /history/{prompt_id}` until its `outputs` are populated.
///
/// Each history request is one attempt of `policy`. Transport and parse
/// failures abort the loop at once; only "not finished yet" is retried.
pub async fn wait_for_outputs(
    api: &ComfyUIApi,
    prompt_id: &str,
    policy: &RetryPolicy,
) -> Result<Outputs, PollError> {
    tracing::info!(
        prompt_id,
        max_attempts = policy.max_attempts,
        interval_ms = policy.delay.as_millis() as u64,
        "Waiting until image generation is complete",
    );

    let result = retry_until(policy, |attempt| async move {
        match api.get_history(prompt_id).await {
            Ok(history) => match completed_outputs(&history, prompt_id) {
                Some(outputs) => Attempt::Ready(outputs),
                None => {
                    tracing::trace!(prompt_id, attempt, "Prompt not finished");
                    Attempt::Pending
                }
            },
            Err(e) => Attempt::Failed(e),
        }
    })
    .await;

    match result {
        Ok(outputs) => {
            tracing::info!(prompt_id, nodes = outputs.len(), "Image generation is done");
            Ok(outputs)
        }
        Err(RetryError::Exhausted { attempts }) => {
            tracing::error!(prompt_id, attempts, "Gave up waiting for image generation");
            Err(PollError::Timeout { attempts })
        }
        Err(RetryError::Aborted(e)) => {
            tracing::error!(prompt_id, error = %e, "History request failed");
            Err(PollError::Polling(e))
        }
    }
}

//! Availability probe run before a job touches ComfyUI.

use std::convert::Infallible;

use crate::api::ComfyUIApi;
use crate::retry::{retry_until, Attempt, RetryPolicy};

/// Poll `GET /` until ComfyUI answers `200` or the policy is exhausted.
///
/// Connection errors are expected while the server boots and count as
/// "not ready yet". Returns `false` when the budget runs out; callers
/// treat that as a soft signal.
pub async fn wait_until_available(api: &ComfyUIApi, policy: &RetryPolicy) -> bool {
    let result = retry_until(policy, |attempt| async move {
        match api.is_available().await {
            Ok(true) => Attempt::<(), Infallible>::Ready(()),
            Ok(false) => Attempt::Pending,
            Err(e) => {
                tracing::trace!(attempt, error = %e, "ComfyUI not reachable yet");
                Attempt::Pending
            }
        }
    })
    .await;

    match result {
        Ok(()) => {
            tracing::info!(api_url = %api.api_url(), "ComfyUI API is reachable");
            true
        }
        Err(_) => {
            tracing::warn!(
                api_url = %api.api_url(),
                attempts = policy.max_attempts,
                "Failed to connect to ComfyUI",
            );
            false
        }
    }
}

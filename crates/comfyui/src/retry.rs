//! Fixed-interval retry loop shared by the availability probe and the
//! completion poller.
//!
//! ComfyUI's startup and execution times are roughly constant, so the
//! loop waits a fixed [`RetryPolicy::delay`] between attempts instead of
//! backing off. Each attempt reports an [`Attempt`]; the loop stops on the
//! first `Ready`, on the first `Failed`, or when the attempt budget runs
//! out.

use std::future::Future;
use std::time::Duration;

/// Attempt budget and spacing for [`retry_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Build a policy from a millisecond interval, as configured via env.
    pub fn from_millis(max_attempts: u32, interval_ms: u64) -> Self {
        Self::new(max_attempts, Duration::from_millis(interval_ms))
    }

    /// Worst-case time spent sleeping when every attempt is pending.
    pub fn max_wait(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Condition met; stop and return the value.
    Ready(T),
    /// Not yet; try again after the delay.
    Pending,
    /// Unrecoverable; stop immediately.
    Failed(E),
}

/// Why [`retry_until`] gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt reported [`Attempt::Pending`].
    Exhausted { attempts: u32 },
    /// An attempt reported [`Attempt::Failed`].
    Aborted(E),
}

/// Run `op` until it reports [`Attempt::Ready`] or [`Attempt::Failed`],
/// at most `policy.max_attempts` times.
///
/// `op` receives the 1-based attempt number. The delay is applied between
/// attempts only, so an exhausted budget costs exactly `max_attempts`
/// calls and `max_attempts - 1` sleeps.
pub async fn retry_until<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    for attempt in 1..=policy.max_attempts {
        match op(attempt).await {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Failed(err) => return Err(RetryError::Aborted(err)),
            Attempt::Pending => {
                tracing::trace!(attempt, max_attempts = policy.max_attempts, "Attempt pending");
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
    })
}

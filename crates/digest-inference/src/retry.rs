//! Cancellable retry combinator for throttled provider calls.
//!
//! Only failures carrying the throttling signature are retried, after a
//! fixed cool-down. Every other failure is returned immediately. Both the
//! attempt and the cool-down race the [`CancellationToken`], so a caller
//! can abort a run that is waiting out a cool-down.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use digest_core::{defaults, Error, Result};

/// Retry settings.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts allowed after the first one.
    pub max_retries: u32,
    /// Fixed wait before each retry.
    pub cool_down: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            cool_down: Duration::from_secs(defaults::RETRY_COOL_DOWN_SECS),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            cool_down: Duration::ZERO,
        }
    }

    /// Total attempts this policy permits.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// A value together with the number of attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails without throttling, or runs out of
/// attempts.
///
/// `op` receives the 1-based attempt number. Exhaustion is reported as
/// `ResourceExhausted` carrying the attempt count and the last error;
/// cancellation as `Cancelled`.
pub async fn retry_throttled<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<Retried<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled(format!(
                    "AI API call cancelled during attempt {}",
                    attempt
                )));
            }
            outcome = op(attempt) => outcome,
        };

        let err = match outcome {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                })
            }
            Err(err) if err.is_throttling() => err,
            Err(err) => return Err(err),
        };

        if attempt >= policy.max_attempts() {
            warn!(
                subsystem = "inference",
                component = "retry",
                attempts = attempt,
                error = %err,
                "Provider still throttling, giving up"
            );
            return Err(Error::ResourceExhausted(format!(
                "AI API call failed after {} attempts: {}",
                attempt, err
            )));
        }

        warn!(
            subsystem = "inference",
            component = "retry",
            attempt,
            max_retries = policy.max_retries,
            wait_secs = policy.cool_down.as_secs(),
            error = %err,
            "Provider throttled request, will retry"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled(format!(
                    "AI API call cancelled while waiting to retry after attempt {}",
                    attempt
                )));
            }
            _ = tokio::time::sleep(policy.cool_down) => {}
        }

        info!(
            subsystem = "inference",
            component = "retry",
            attempt = attempt + 1,
            "Retrying provider call"
        );
    }
}

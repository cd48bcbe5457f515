//! Retry loop: run an async attempt until success, a non-retryable error,
//! the attempt limit, or cancellation.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::classify;
use super::policy::{RetryDecision, RetryPolicy};
use crate::fetch::FetchError;

/// Result of a retried operation plus the number of attempts actually made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, FetchError>,
    pub attempts: u32,
}

/// Runs `f(attempt)` (attempt is 1-based) until it succeeds or the policy says
/// to stop. Backoff sleeps are interrupted by `cancel`, which ends the loop
/// with `FetchError::Cancelled`.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut f: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: Err(FetchError::Cancelled),
                attempts: attempt - 1,
            };
        }
        let err = match f(attempt).await {
            Ok(v) => {
                return RetryOutcome {
                    result: Ok(v),
                    attempts: attempt,
                }
            }
            Err(e) => e,
        };
        let kind = classify::classify(&err);
        match policy.decide(attempt, kind) {
            RetryDecision::NoRetry => {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                }
            }
            RetryDecision::RetryAfter(delay) => {
                tracing::debug!(
                    attempt,
                    ?kind,
                    delay_ms = delay.as_millis() as u64,
                    "fetch attempt failed, retrying: {}",
                    err
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return RetryOutcome {
                            result: Err(FetchError::Cancelled),
                            attempts: attempt,
                        };
                    }
                }
                attempt += 1;
            }
        }
    }
}

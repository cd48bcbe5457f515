//! Retry and backoff policy for archive fetches.
//!
//! Classifies fetch failures (timeouts, throttling, connection failures,
//! HTTP status) and makes the exponential backoff decision so the fetcher
//! and the orchestrator share one policy.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::{run_with_retry, RetryOutcome};

//! Archive fetcher.
//!
//! Streams a remote archive to a temp file with curl (one blocking transfer
//! per attempt, run on the blocking pool), retrying transient failures per
//! [`RetryPolicy`]. Cancellation aborts the in-flight transfer at the next
//! curl callback and the partial file is deleted.

mod error;
mod transfer;

pub use error::FetchError;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::retry::{run_with_retry, RetryOutcome, RetryPolicy};

/// Per-attempt transfer bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Largest body accepted, in bytes.
    pub max_bytes: u64,
    pub connect_timeout: Duration,
    /// Wall-clock bound for a whole attempt.
    pub attempt_timeout: Duration,
    /// Bytes/s below which an attempt counts as stalled...
    pub low_speed_limit: u32,
    /// ...once it stays there this long.
    pub low_speed_time: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024 * 1024,
            connect_timeout: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(600),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
        }
    }
}

/// Live counters for an in-progress fetch, readable from another task.
#[derive(Debug, Clone, Default)]
pub struct TransferCounters {
    bytes: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    attempt: Arc<AtomicU32>,
    /// Attempts spent by earlier fetches of the same run.
    earlier: Arc<AtomicU32>,
}

impl TransferCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written by the current attempt.
    pub fn bytes_done(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Expected size if the server announced one.
    pub fn total_bytes(&self) -> Option<u64> {
        match self.total.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// 1-based number of the attempt in flight, counted across every fetch
    /// of the run (0 before the first starts).
    pub fn attempt(&self) -> u32 {
        match self.attempt.load(Ordering::Relaxed) {
            0 => 0,
            n => n + self.earlier.load(Ordering::Relaxed),
        }
    }

    /// Start a new fetch that follows `spent` attempts already made.
    pub(crate) fn continue_after(&self, spent: u32) {
        self.earlier.store(spent, Ordering::Relaxed);
        self.attempt.store(0, Ordering::Relaxed);
    }

    pub(crate) fn bytes_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes)
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn start_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
    }
}

/// A fully downloaded archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the archive, for integrity logging.
    pub sha256: String,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Fetch `url` into `dest` with retries. See [`fetch_with_attempts`].
pub async fn fetch(
    url: &str,
    dest: &Path,
    opts: &FetchOptions,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<FetchedFile, FetchError> {
    fetch_with_attempts(url, dest, opts, policy, cancel, None)
        .await
        .result
}

/// Fetch `url` into `dest`, retrying transient failures; reports the attempt
/// count on failure too. `dest` does not exist after any failure.
pub async fn fetch_with_attempts(
    url: &str,
    dest: &Path,
    opts: &FetchOptions,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    counters: Option<TransferCounters>,
) -> RetryOutcome<FetchedFile> {
    let outcome = run_with_retry(policy, cancel, |attempt| {
        let url = url.to_string();
        let dest = dest.to_path_buf();
        let opts = *opts;
        let cancel = cancel.clone();
        let counters = counters.clone();
        async move {
            if let Some(c) = &counters {
                c.start_attempt(attempt);
            }
            tracing::debug!(attempt, url = %url, "fetch attempt");
            let joined = tokio::task::spawn_blocking(move || {
                transfer::fetch_once(&url, &dest, &opts, &cancel, counters.as_ref())
            })
            .await;
            match joined {
                Ok(res) => res,
                Err(e) => Err(FetchError::Internal(format!("fetch task join: {e}"))),
            }
        }
    })
    .await;

    let attempts = outcome.attempts;
    let result = match outcome.result {
        Ok(written) => {
            tracing::info!(
                url,
                bytes = written.bytes,
                sha256 = %written.sha256,
                attempts,
                "archive fetched"
            );
            Ok(FetchedFile {
                path: written.path,
                bytes: written.bytes,
                sha256: written.sha256,
                attempts,
            })
        }
        Err(e) => {
            remove_partial(dest).await;
            Err(e)
        }
    };
    RetryOutcome { result, attempts }
}

async fn remove_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => tracing::debug!(path = %dest.display(), "removed partial archive"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dest.display(), "could not remove partial archive: {}", e),
    }
}

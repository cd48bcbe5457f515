//! Fetch error type.

/// Error from fetching an archive. Classified by [`crate::retry::classify`]
/// to decide whether another attempt is made.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Attempt exceeded its wall-clock bound or stalled below the low-speed limit.
    #[error("timed out")]
    Timeout,
    /// Declared or streamed body exceeded the configured maximum.
    #[error("archive exceeds the {limit}-byte limit")]
    TooLarge { limit: u64 },
    /// Final (post-redirect) response was not 2xx.
    #[error("HTTP {0}")]
    HttpStatus(u32),
    /// Transport failure reported by curl (DNS, connect, reset, TLS, ...).
    #[error("network: {0}")]
    Network(#[source] curl::Error),
    /// Body ended before `Content-Length` bytes arrived.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// Writing the temp archive failed (disk full, permission denied). Not retried.
    #[error("storage: {0}")]
    Storage(#[source] std::io::Error),
    #[error("cancelled")]
    Cancelled,
    /// Worker task failed to complete (panic or runtime shutdown).
    #[error("internal: {0}")]
    Internal(String),
}

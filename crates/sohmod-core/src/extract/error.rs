//! Extraction error type.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Not a readable archive, a truncated one, or an entry failed its CRC.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),
    /// An entry (or symlink target) would land outside the staging directory.
    #[error("path traversal in entry `{entry}`")]
    PathTraversal { entry: String },
    #[error("disk full while extracting")]
    DiskFull(#[source] io::Error),
    /// Sum of declared uncompressed sizes is over the configured bound.
    #[error("archive unpacks to {declared} bytes, over the {limit}-byte limit")]
    Oversized { declared: u64, limit: u64 },
    #[error("extraction I/O: {0}")]
    Io(#[source] io::Error),
    #[error("cancelled")]
    Cancelled,
    #[error("internal: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Classify a write-side I/O failure.
    pub(super) fn from_write(e: io::Error) -> Self {
        if crate::storage::is_disk_full(&e) {
            ExtractError::DiskFull(e)
        } else {
            ExtractError::Io(e)
        }
    }
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => ExtractError::CorruptArchive(io.to_string()),
            other => ExtractError::CorruptArchive(other.to_string()),
        }
    }
}

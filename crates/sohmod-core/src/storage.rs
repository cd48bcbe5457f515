//! Temp-archive file lifecycle.
//!
//! The fetcher streams the response body through an [`ArchiveWriter`]:
//! sequential buffered writes, a hard size cap, inline SHA-256, and a shared
//! byte counter for progress reporting. Nothing is buffered beyond the
//! write buffer, so archive size is bounded only by the cap.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const WRITE_BUF: usize = 256 * 1024;

/// Why a chunk could not be accepted.
#[derive(Debug)]
pub enum SinkError {
    /// Accepting the chunk would exceed the byte cap.
    TooLarge { limit: u64 },
    Io(io::Error),
}

/// Final size and digest of a fully written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArchive {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Sequential writer for `<modsRoot>/.tmp/<uuid>.archive`.
pub struct ArchiveWriter {
    file: BufWriter<File>,
    path: PathBuf,
    hasher: Sha256,
    written: u64,
    limit: u64,
    progress: Option<Arc<AtomicU64>>,
}

impl ArchiveWriter {
    /// Create (or truncate) the temp file at `path`. `limit` is the largest
    /// body accepted; `progress`, if given, is kept equal to bytes written.
    pub fn create(path: &Path, limit: u64, progress: Option<Arc<AtomicU64>>) -> io::Result<Self> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        if let Some(p) = &progress {
            p.store(0, Ordering::Relaxed);
        }
        Ok(Self {
            file: BufWriter::with_capacity(WRITE_BUF, file),
            path: path.to_path_buf(),
            hasher: Sha256::new(),
            written: 0,
            limit,
            progress,
        })
    }

    /// Append `data`. Rejects the chunk (writing nothing) if it would cross the cap.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let next = self.written.saturating_add(data.len() as u64);
        if next > self.limit {
            return Err(SinkError::TooLarge { limit: self.limit });
        }
        self.file.write_all(data).map_err(SinkError::Io)?;
        self.hasher.update(data);
        self.written = next;
        if let Some(p) = &self.progress {
            p.store(next, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush, fsync and close the file; returns size and hex digest.
    pub fn finish(self) -> io::Result<WrittenArchive> {
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(WrittenArchive {
            path: self.path,
            bytes: self.written,
            sha256: hex::encode(self.hasher.finalize()),
        })
    }
}

/// True if `e` means the filesystem ran out of space.
pub fn is_disk_full(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if e.raw_os_error() == Some(libc::ENOSPC) {
            return true;
        }
    }
    #[cfg(windows)]
    {
        // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
        if matches!(e.raw_os_error(), Some(39) | Some(112)) {
            return true;
        }
    }
    false
}

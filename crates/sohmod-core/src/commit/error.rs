//! Commit error type.

use std::io;
use std::path::PathBuf;

/// Outcome of a failed commit. Both variants leave the staging directory and
/// temp archive removed; they differ in what is left at the final path.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// The swap did not happen and the previous installation (if any) is in
    /// place. `rolled_back` is true when the old install had already been
    /// moved aside and was restored.
    #[error("commit failed, previous installation intact: {source}")]
    Filesystem {
        rolled_back: bool,
        #[source]
        source: io::Error,
    },
    /// Restoring the previous installation failed. It survives only at
    /// `backup`; manual intervention is needed.
    #[error("commit failed and rollback failed; previous installation left at {}", .backup.display())]
    RollbackFailed {
        backup: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CommitError {
    /// True if the mods root may be inconsistent.
    pub fn needs_manual_recovery(&self) -> bool {
        matches!(self, CommitError::RollbackFailed { .. })
    }
}

//! Work-area cleanup for a run.

use crate::layout::{remove_path, WorkPaths};

/// Removes a run's temp archive and staging directory. Call [`cleanup`] on
/// the normal path; drop covers panics and aborted tasks. Swap backups are
/// left alone: after a failed rollback they hold the only copy of the
/// previous installation.
///
/// [`cleanup`]: WorkAreaGuard::cleanup
pub(super) struct WorkAreaGuard {
    paths: WorkPaths,
    done: bool,
}

impl WorkAreaGuard {
    pub(super) fn new(paths: WorkPaths) -> Self {
        Self { paths, done: false }
    }

    pub(super) fn paths(&self) -> &WorkPaths {
        &self.paths
    }

    pub(super) fn cleanup(&mut self) {
        self.done = true;
        for path in [&self.paths.archive, &self.paths.staging] {
            if let Err(e) = remove_path(path) {
                tracing::warn!(path = %path.display(), "work area cleanup failed: {}", e);
            }
        }
    }
}

impl Drop for WorkAreaGuard {
    fn drop(&mut self) {
        if !self.done {
            self.cleanup();
        }
    }
}

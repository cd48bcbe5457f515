//! Per-final-path commit locks.
//!
//! Held only for the swap itself, never across fetch or extraction. Callers
//! are blocking (the commit runs on the blocking pool), so a std mutex plus
//! condvar is enough.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct CommitLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl CommitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `final_dir` is free, then hold it until the guard drops.
    pub fn acquire(&self, final_dir: &Path) -> CommitLockGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(final_dir) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(final_dir.to_path_buf());
        CommitLockGuard {
            locks: self,
            path: final_dir.to_path_buf(),
        }
    }

    pub fn is_held(&self, final_dir: &Path) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(final_dir)
    }
}

/// Releases the path on drop, including when the swap panics.
pub struct CommitLockGuard<'a> {
    locks: &'a CommitLocks,
    path: PathBuf,
}

impl Drop for CommitLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.path);
        drop(held);
        self.locks.released.notify_all();
    }
}

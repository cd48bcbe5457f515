//! Installation committer.
//!
//! Moves a validated staging directory to `<modsRoot>/<modName>`, replacing
//! any previous installation in one swap, then removes the run's temp
//! archive and staging directory whatever the outcome.

mod error;
mod lock;
mod swap;

pub use error::CommitError;
pub use lock::{CommitLockGuard, CommitLocks};

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::layout::{remove_path, ModsLayout, WorkPaths};
use swap::Swapped;

/// A committed installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModInstallation {
    pub mod_name: String,
    pub path: PathBuf,
    /// An earlier installation of the same name was replaced.
    pub replaced_previous: bool,
}

/// Commit `work.staging` as `mod_name`. Blocking.
///
/// The per-path lock in `locks` is held for the swap only. On success or
/// failure `work.staging` and `work.archive` are gone afterwards; on
/// [`CommitError::RollbackFailed`] the previous installation is left at
/// `work.backup`.
pub fn commit(
    work: &WorkPaths,
    mod_name: &str,
    layout: &ModsLayout,
    locks: &CommitLocks,
) -> Result<ModInstallation, CommitError> {
    let final_dir = layout.final_dir(mod_name);
    let swapped = {
        let _guard = locks.acquire(&final_dir);
        swap::swap_into_place(&work.staging, &final_dir, &work.backup)
    };

    // Old trees are deleted outside the lock.
    cleanup(&work.staging);
    cleanup(&work.archive);
    let swapped = swapped?;
    if swapped == Swapped::ViaBackup {
        cleanup(&work.backup);
    }

    tracing::info!(
        mod_name,
        path = %final_dir.display(),
        ?swapped,
        "installation committed"
    );
    Ok(ModInstallation {
        mod_name: mod_name.to_string(),
        path: final_dir,
        replaced_previous: swapped != Swapped::Fresh,
    })
}

fn cleanup(path: &Path) {
    if let Err(e) = remove_path(path) {
        tracing::warn!(path = %path.display(), "cleanup after commit failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn stage(layout: &ModsLayout, files: &[String]) -> WorkPaths {
        let work = layout.new_work_paths();
        fs::create_dir_all(&work.staging).unwrap();
        for f in files {
            fs::write(work.staging.join(f), f.as_bytes()).unwrap();
        }
        fs::write(&work.archive, b"zip").unwrap();
        work
    }

    fn generation(g: usize, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("g{g:02}-f{i:02}.otr")).collect()
    }

    #[test]
    fn first_commit_then_replace() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModsLayout::init(dir.path()).unwrap();
        let locks = CommitLocks::new();

        let work = stage(&layout, &["a.otr".to_string()]);
        let inst = commit(&work, "CoolMod", &layout, &locks).unwrap();
        assert!(!inst.replaced_previous);
        assert_eq!(inst.path, dir.path().join("CoolMod"));
        assert!(!work.staging.exists());
        assert!(!work.archive.exists());

        let work = stage(&layout, &["b.otr".to_string()]);
        let inst = commit(&work, "CoolMod", &layout, &locks).unwrap();
        assert!(inst.replaced_previous);
        assert!(inst.path.join("b.otr").exists());
        assert!(!inst.path.join("a.otr").exists());
        assert!(!work.staging.exists());
        assert!(!work.backup.exists());
        assert!(!locks.is_held(&inst.path));
    }

    #[test]
    fn failed_commit_still_cleans_work_area() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModsLayout::init(dir.path()).unwrap();
        let work = layout.new_work_paths();
        // Staging never created: the rename fails.
        fs::write(&work.archive, b"zip").unwrap();
        let err = commit(&work, "Ghost", &layout, &CommitLocks::new()).unwrap_err();
        assert!(matches!(
            err,
            CommitError::Filesystem {
                rolled_back: false,
                ..
            }
        ));
        assert!(!work.archive.exists());
        assert!(!dir.path().join("Ghost").exists());
    }

    #[test]
    fn readers_never_see_a_mixed_tree() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModsLayout::init(dir.path()).unwrap();
        let locks = CommitLocks::new();
        commit(&stage(&layout, &generation(0, 24)), "Swapped", &layout, &locks).unwrap();

        let final_dir = layout.final_dir("Swapped");
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || loop {
                if let Ok(entries) = fs::read_dir(&final_dir) {
                    // A reader that opened a replaced tree may watch it being
                    // deleted, but never sees files from two generations.
                    let generations: BTreeSet<String> = entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .filter_map(|n| n.split('-').next().map(str::to_string))
                        .collect();
                    assert!(generations.len() <= 1, "mixed tree: {generations:?}");
                }
                if stop.load(Ordering::Relaxed) {
                    break;
                }
            })
        };

        for g in 1..=20 {
            commit(&stage(&layout, &generation(g, 24)), "Swapped", &layout, &locks).unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();
        let finals = fs::read_dir(layout.final_dir("Swapped")).unwrap().count();
        assert_eq!(finals, 24);
        assert_eq!(layout.purge_work_areas().unwrap(), 0);
    }
}

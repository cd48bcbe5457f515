//! Directory swap primitives.
//!
//! Preferred path is `renameat2(RENAME_EXCHANGE)` on Linux and
//! `renamex_np(RENAME_SWAP)` on macOS, which swap the staging and final
//! directories in one step so a reader resolving the final path sees either
//! the old tree or the new one. Elsewhere (or when the
//! filesystem refuses the exchange) we fall back to a two-rename swap through
//! a backup path, with rollback.

use std::fs;
use std::io;
use std::path::Path;

use super::CommitError;

/// How the staging directory reached its final path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Swapped {
    /// No previous installation; plain rename.
    Fresh,
    /// Atomic exchange; the old tree now sits at the staging path.
    Exchanged,
    /// Fallback swap; the old tree now sits at the backup path.
    ViaBackup,
}

pub(super) fn swap_into_place(
    staging: &Path,
    final_dir: &Path,
    backup: &Path,
) -> Result<Swapped, CommitError> {
    match fs::symlink_metadata(final_dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return fs::rename(staging, final_dir)
                .map(|()| Swapped::Fresh)
                .map_err(|source| CommitError::Filesystem {
                    rolled_back: false,
                    source,
                });
        }
        Err(source) => {
            return Err(CommitError::Filesystem {
                rolled_back: false,
                source,
            })
        }
        Ok(_) => {}
    }

    match exchange(staging, final_dir) {
        Ok(()) => return Ok(Swapped::Exchanged),
        Err(e) => tracing::debug!(
            final_dir = %final_dir.display(),
            "atomic exchange unavailable, using backup swap: {}",
            e
        ),
    }
    swap_via_backup(staging, final_dir, backup, |from, to| fs::rename(from, to))
}

/// old -> backup, staging -> final; on failure of the second step, backup -> final.
pub(super) fn swap_via_backup(
    staging: &Path,
    final_dir: &Path,
    backup: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> Result<Swapped, CommitError> {
    rename(final_dir, backup).map_err(|source| CommitError::Filesystem {
        rolled_back: false,
        source,
    })?;
    let err = match rename(staging, final_dir) {
        Ok(()) => return Ok(Swapped::ViaBackup),
        Err(e) => e,
    };
    match rename(backup, final_dir) {
        Ok(()) => {
            tracing::warn!(final_dir = %final_dir.display(), "swap failed, previous installation restored: {}", err);
            Err(CommitError::Filesystem {
                rolled_back: true,
                source: err,
            })
        }
        Err(restore) => {
            tracing::error!(
                final_dir = %final_dir.display(),
                backup = %backup.display(),
                "swap failed ({}) and restoring the previous installation failed: {}",
                err,
                restore
            );
            Err(CommitError::RollbackFailed {
                backup: backup.to_path_buf(),
                source: restore,
            })
        }
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn exchange(a: &Path, b: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let to_c = |p: &Path| {
        CString::new(p.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    };
    let a = to_c(a)?;
    let b = to_c(b)?;
    // SAFETY: both pointers are valid NUL-terminated strings for the call.
    let rc = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            a.as_ptr(),
            libc::AT_FDCWD,
            b.as_ptr(),
            libc::RENAME_EXCHANGE,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(target_os = "macos")]
fn exchange(a: &Path, b: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let to_c = |p: &Path| {
        CString::new(p.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    };
    let a = to_c(a)?;
    let b = to_c(b)?;
    // SAFETY: both pointers are valid NUL-terminated strings for the call.
    let rc = unsafe { libc::renamex_np(a.as_ptr(), b.as_ptr(), libc::RENAME_SWAP) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(all(target_os = "linux", target_env = "gnu"), target_os = "macos")))]
fn exchange(_a: &Path, _b: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "atomic directory exchange not supported on this platform",
    ))
}

//! On-disk layout of the mods root.
//!
//! ```text
//! <modsRoot>/<modName>/...            committed installations
//! <modsRoot>/.tmp/<uuid>.archive      archive being fetched
//! <modsRoot>/.staging/<uuid>/         archive being extracted
//! <modsRoot>/.staging/<uuid>.old/     previous install during a fallback swap
//! <modsRoot>/.lock                     advisory lock held by the owning process
//! ```
//!
//! Work areas live inside the mods root so every rename stays on one filesystem.
//! Only the process holding `.lock` may purge them: anything found there by
//! the owner is a leftover from a dead process, while a non-owner would be
//! deleting another live process's runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

pub const TMP_DIR: &str = ".tmp";
pub const STAGING_DIR: &str = ".staging";
const ARCHIVE_EXT: &str = "archive";
const BACKUP_SUFFIX: &str = ".old";
const LOCK_FILE: &str = ".lock";

/// Transient paths owned by one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    pub id: Uuid,
    pub archive: PathBuf,
    pub staging: PathBuf,
    pub backup: PathBuf,
}

/// A committed installation found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledMod {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ModsLayout {
    root: PathBuf,
    /// Set when this layout owns the root; released when the last clone drops.
    owner: Option<Arc<RootLock>>,
}

impl ModsLayout {
    /// Layout rooted at `root`; touches nothing on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            owner: None,
        }
    }

    /// Create the root and work areas and try to become the root's owner.
    /// The owner purges leftovers from a previous process that died mid-run;
    /// if another live process owns the root, its work areas are left alone.
    pub fn init(root: impl Into<PathBuf>) -> io::Result<Self> {
        let mut layout = Self::new(root);
        fs::create_dir_all(&layout.root)?;
        fs::create_dir_all(layout.tmp_dir())?;
        fs::create_dir_all(layout.staging_root())?;
        match RootLock::try_acquire(&layout.root.join(LOCK_FILE))? {
            Some(lock) => {
                layout.owner = Some(Arc::new(lock));
                let purged = layout.purge_work_areas()?;
                if purged > 0 {
                    tracing::info!(purged, root = %layout.root.display(), "purged stale work files");
                }
            }
            None => tracing::info!(
                root = %layout.root.display(),
                "mods root is owned by another sohmod process; skipping purge"
            ),
        }
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if this layout holds the root's lock (and so ran the purge).
    pub fn owns_root(&self) -> bool {
        self.owner.is_some()
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn final_dir(&self, mod_name: &str) -> PathBuf {
        self.root.join(mod_name)
    }

    /// Fresh, uniquely named work paths for one run.
    pub fn new_work_paths(&self) -> WorkPaths {
        self.work_paths(Uuid::new_v4())
    }

    pub fn work_paths(&self, id: Uuid) -> WorkPaths {
        let name = id.simple().to_string();
        WorkPaths {
            id,
            archive: self.tmp_dir().join(format!("{name}.{ARCHIVE_EXT}")),
            staging: self.staging_root().join(&name),
            backup: self.staging_root().join(format!("{name}{BACKUP_SUFFIX}")),
        }
    }

    /// Remove everything in `.tmp` and `.staging` except swap backups, which
    /// may be the only copy of an installation after a failed rollback.
    /// Returns the number of entries removed.
    pub fn purge_work_areas(&self) -> io::Result<usize> {
        let mut removed = 0;
        for dir in [self.tmp_dir(), self.staging_root()] {
            let entries = match fs::read_dir(&dir) {
                Ok(e) => e,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if is_backup(&path) {
                    tracing::warn!(
                        path = %path.display(),
                        "keeping backup from an unfinished swap; restore it manually"
                    );
                    continue;
                }
                remove_path(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Committed installations, sorted by name. Hidden entries are work areas.
    pub fn installed_mods(&self) -> io::Result<Vec<InstalledMod>> {
        let mut mods = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }
            mods.push(InstalledMod {
                name,
                path: entry.path(),
            });
        }
        mods.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(mods)
    }
}

/// Exclusive advisory lock on `<root>/.lock`, released when the file closes.
#[derive(Debug)]
struct RootLock {
    _file: fs::File,
}

impl RootLock {
    /// `Ok(None)` if another open handle (this process or another) holds it.
    fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        if lock_exclusive_nonblocking(&file)? {
            Ok(Some(Self { _file: file }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(unix)]
fn lock_exclusive_nonblocking(file: &fs::File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    // flock locks belong to the open file description, so two handles in one
    // process exclude each other just like two processes do.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn lock_exclusive_nonblocking(file: &fs::File) -> io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(fs::TryLockError::WouldBlock) => Ok(false),
        Err(fs::TryLockError::Error(e)) => Err(e),
    }
}

fn is_backup(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.ends_with(BACKUP_SUFFIX))
}

/// Remove a file or directory tree; missing paths are fine.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let res = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match res {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

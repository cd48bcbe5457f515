//! Archive extractor.
//!
//! Unpacks a zip archive into a fresh staging directory in two passes: the
//! first reads the central directory and validates every entry (paths,
//! symlink targets, declared sizes) without writing anything; the second
//! writes directories and files, then symlinks last. Any failure discards
//! the staging directory.

mod entry;
mod error;

pub use error::ExtractError;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::layout::remove_path;

const COPY_BUF: usize = 64 * 1024;
/// Longest symlink target we will read from an entry body.
const MAX_LINK_TARGET: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Bound on total uncompressed bytes, declared or actual.
    pub max_unpacked_bytes: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_unpacked_bytes: 8 * 1024 * 1024 * 1024,
        }
    }
}

/// What an extraction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    pub bytes: u64,
}

enum Kind {
    Dir,
    File { mode: Option<u32> },
    Symlink { target: String },
}

struct Planned {
    index: usize,
    rel: PathBuf,
    kind: Kind,
}

fn is_symlink_mode(mode: Option<u32>) -> bool {
    mode.map_or(false, |m| m & 0o170000 == 0o120000)
}

/// Extract `archive` into `staging`, which must not exist yet.
///
/// Blocking; run on the blocking pool. `cancel` is checked between entries.
/// On error `staging` is removed before returning.
pub fn extract(
    archive: &Path,
    staging: &Path,
    opts: &ExtractOptions,
    cancel: &CancellationToken,
) -> Result<ExtractSummary, ExtractError> {
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent).map_err(ExtractError::from_write)?;
    }
    fs::create_dir(staging).map_err(ExtractError::Io)?;

    let result = extract_into(archive, staging, opts, cancel);
    match &result {
        Ok(summary) => tracing::debug!(
            staging = %staging.display(),
            files = summary.files,
            bytes = summary.bytes,
            "archive extracted"
        ),
        Err(e) => {
            tracing::debug!(staging = %staging.display(), "extraction failed: {}", e);
            if let Err(rm) = remove_path(staging) {
                tracing::warn!(staging = %staging.display(), "could not discard staging: {}", rm);
            }
        }
    }
    result
}

fn extract_into(
    archive_path: &Path,
    staging: &Path,
    opts: &ExtractOptions,
    cancel: &CancellationToken,
) -> Result<ExtractSummary, ExtractError> {
    let file = File::open(archive_path).map_err(ExtractError::Io)?;
    let mut archive = zip::ZipArchive::new(std::io::BufReader::new(file))?;
    if archive.is_empty() {
        return Err(ExtractError::CorruptArchive("archive has no entries".into()));
    }

    let plan = plan_entries(&mut archive, opts)?;

    let mut summary = ExtractSummary::default();
    let mut buf = vec![0u8; COPY_BUF];
    let mut links = Vec::new();
    for item in plan {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let out = staging.join(&item.rel);
        match item.kind {
            Kind::Dir => {
                fs::create_dir_all(&out).map_err(ExtractError::from_write)?;
                summary.dirs += 1;
            }
            Kind::File { mode } => {
                if let Some(parent) = out.parent() {
                    fs::create_dir_all(parent).map_err(ExtractError::from_write)?;
                }
                let mut entry = archive.by_index(item.index)?;
                let mut dest = File::create(&out).map_err(ExtractError::from_write)?;
                let budget = opts.max_unpacked_bytes.saturating_sub(summary.bytes);
                let n = copy_entry(&mut entry, &mut dest, &mut buf, budget, opts.max_unpacked_bytes)?;
                dest.flush().map_err(ExtractError::from_write)?;
                summary.bytes += n;
                summary.files += 1;
                set_mode(&out, mode)?;
            }
            Kind::Symlink { target } => links.push((out, target)),
        }
    }

    for (out, target) in links {
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(ExtractError::from_write)?;
        }
        make_symlink(&target, &out)?;
        summary.symlinks += 1;
    }
    Ok(summary)
}

/// First pass: validate every entry and build the write plan.
fn plan_entries<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    opts: &ExtractOptions,
) -> Result<Vec<Planned>, ExtractError> {
    let mut plan = Vec::with_capacity(archive.len());
    let mut declared: u64 = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let rel = match entry::confined_path(&name) {
            Ok(Some(rel)) => rel,
            Ok(None) => continue,
            Err(()) => return Err(ExtractError::PathTraversal { entry: name }),
        };

        let kind = if entry.is_dir() {
            Kind::Dir
        } else if is_symlink_mode(entry.unix_mode()) {
            let mut target = String::new();
            (&mut entry)
                .take(MAX_LINK_TARGET)
                .read_to_string(&mut target)
                .map_err(|e| ExtractError::CorruptArchive(format!("symlink `{name}`: {e}")))?;
            Kind::Symlink { target }
        } else {
            declared = declared.saturating_add(entry.size());
            if declared > opts.max_unpacked_bytes {
                return Err(ExtractError::Oversized {
                    declared,
                    limit: opts.max_unpacked_bytes,
                });
            }
            Kind::File {
                mode: entry.unix_mode(),
            }
        };
        plan.push(Planned { index, rel, kind });
    }

    let mut links = entry::LinkSet::default();
    for item in plan.iter().filter(|p| matches!(p.kind, Kind::Symlink { .. })) {
        links.insert(&item.rel);
    }
    for item in &plan {
        let entry_name = || item.rel.to_string_lossy().into_owned();
        if entry::under_link(&item.rel, &links) {
            return Err(ExtractError::PathTraversal {
                entry: entry_name(),
            });
        }
        if let Kind::Symlink { target } = &item.kind {
            if entry::confined_link_target(&item.rel, target, &links).is_none() {
                return Err(ExtractError::PathTraversal {
                    entry: format!("{} -> {}", entry_name(), target),
                });
            }
        }
    }
    Ok(plan)
}

/// Copy one entry, telling read failures (corruption, CRC) apart from write
/// failures (disk). Fails once more than `budget` bytes come out.
fn copy_entry(
    src: &mut impl Read,
    dest: &mut File,
    buf: &mut [u8],
    budget: u64,
    limit: u64,
) -> Result<u64, ExtractError> {
    let mut copied: u64 = 0;
    loop {
        let n = match src.read(buf) {
            Ok(0) => return Ok(copied),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ExtractError::CorruptArchive(e.to_string())),
        };
        copied += n as u64;
        if copied > budget {
            return Err(ExtractError::Oversized {
                declared: copied,
                limit,
            });
        }
        dest.write_all(&buf[..n]).map_err(ExtractError::from_write)?;
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<(), ExtractError> {
    use std::os::unix::fs::PermissionsExt;
    // Keep owner read/write so later swaps and purges can always remove it.
    if let Some(bits) = mode.map(|m| m & 0o777).filter(|m| *m != 0) {
        fs::set_permissions(path, fs::Permissions::from_mode(bits | 0o600))
            .map_err(ExtractError::Io)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<(), ExtractError> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> Result<(), ExtractError> {
    std::os::unix::fs::symlink(target, link).map_err(ExtractError::from_write)
}

#[cfg(not(unix))]
fn make_symlink(target: &str, link: &Path) -> Result<(), ExtractError> {
    tracing::warn!(link = %link.display(), target, "symlink entries are skipped on this platform");
    Ok(())
}

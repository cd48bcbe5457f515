//! Entry-path confinement checks.
//!
//! Names are normalized lexically: `\` is treated as a separator, `.` and
//! empty components are dropped, and any `..`, absolute path or drive prefix
//! is refused outright rather than clamped.
//!
//! Symlink names are compared case-insensitively: the default filesystems on
//! macOS and Windows treat `Hop/` and `hop/` as the same directory, so a
//! case-sensitive check could be walked around.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Root-relative paths of the archive's symlink entries.
#[derive(Debug, Default)]
pub(super) struct LinkSet(HashSet<String>);

impl LinkSet {
    pub(super) fn insert(&mut self, path: &Path) {
        self.0.insert(fold_case(path));
    }

    pub(super) fn contains(&self, path: &Path) -> bool {
        !self.0.is_empty() && self.0.contains(&fold_case(path))
    }
}

fn fold_case(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalized components of an entry name, or `None` if it escapes the root.
/// An empty vector means the entry names the root itself.
fn confined_components(name: &str) -> Option<Vec<String>> {
    if name.starts_with('/') || name.starts_with('\\') {
        return None;
    }
    let mut out = Vec::new();
    for (i, comp) in name.split(['/', '\\']).enumerate() {
        match comp {
            "" | "." => continue,
            ".." => return None,
            c if c.contains('\0') => return None,
            // `C:` style prefix
            c if i == 0 && c.contains(':') => return None,
            c => out.push(c.to_string()),
        }
    }
    Some(out)
}

/// Relative path for archive entry `name`; `Ok(None)` if it names the root.
pub(super) fn confined_path(name: &str) -> Result<Option<PathBuf>, ()> {
    let comps = confined_components(name).ok_or(())?;
    if comps.is_empty() {
        return Ok(None);
    }
    Ok(Some(comps.iter().collect()))
}

/// Resolve symlink `target` relative to the directory holding `link`, keeping
/// it inside the root.
///
/// `..` may only lead the target: climbing back out of a component that was
/// just entered is refused, because that component may itself be a link
/// (under any spelling the filesystem considers equal) whose physical target
/// defeats the lexical check. Descending through another link is refused too.
pub(super) fn confined_link_target(link: &Path, target: &str, links: &LinkSet) -> Option<PathBuf> {
    if target.is_empty() || target.starts_with('/') || target.starts_with('\\') {
        return None;
    }
    let mut current: Vec<String> = link
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();

    let parts: Vec<&str> = target
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    let mut descended = false;
    for (i, part) in parts.iter().enumerate() {
        if *part == ".." {
            if descended {
                return None;
            }
            current.pop()?;
        } else {
            if part.contains('\0') || (i == 0 && part.contains(':')) {
                return None;
            }
            descended = true;
            current.push(part.to_string());
        }
        let more = i + 1 < parts.len();
        if more && !current.is_empty() {
            let here: PathBuf = current.iter().collect();
            if links.contains(&here) {
                return None;
            }
        }
    }
    Some(current.iter().collect())
}

/// True if some proper ancestor of `path` is one of `links`.
pub(super) fn under_link(path: &Path, links: &LinkSet) -> bool {
    path.ancestors()
        .skip(1)
        .filter(|a| !a.as_os_str().is_empty())
        .any(|a| links.contains(a))
}

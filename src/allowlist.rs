//! Textual allowlist for filesystem paths.
//!
//! Paths are normalized lexically (no symlink resolution) and accepted when
//! they equal the browsing root or sit inside one of the allowed roots.

use std::path::{Component, Path, PathBuf};

/// Collapse `.`, `..` and repeated separators without touching the filesystem.
///
/// `..` never climbs above the root of an absolute path; for relative paths
/// leading `..` components are kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[derive(Debug, Clone)]
pub struct PathAllowlist {
    root: PathBuf,
    allowed: Vec<PathBuf>,
}

impl PathAllowlist {
    pub fn new(root: impl AsRef<Path>, allowed: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            root: normalize_path(root.as_ref()),
            allowed: allowed.into_iter().map(|p| normalize_path(&p)).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        let target = normalize_path(path);
        if target == self.root {
            return true;
        }
        // Path::starts_with compares whole components, so `/app/DatasetsX`
        // does not match `/app/Datasets`.
        self.allowed.iter().any(|allowed| target.starts_with(allowed))
    }
}

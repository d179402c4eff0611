//! Allowlisted directory browsing over the local filesystem.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::allowlist::{normalize_path, PathAllowlist};
use crate::error::{GatewayError, Result};
use crate::types::{sort_directory_items, DirectoryItem, DirectoryListing, ItemKind};

pub const DEFAULT_SEARCH_DEPTH: usize = 3;

/// Case-insensitive wildcard match of a whole name. `?` matches one
/// character, `*` any run of characters including none.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();

    let (mut p, mut n) = (0, 0);
    // Position of the last `*` seen and the name index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some(&'*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailablePath {
    pub name: String,
    pub path: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailablePaths {
    pub root_path: String,
    pub available_paths: Vec<AvailablePath>,
}

pub struct DirectoryBrowser {
    allowlist: PathAllowlist,
}

fn item_from_metadata(name: String, path: &Path, meta: &std::fs::Metadata) -> DirectoryItem {
    let is_dir = meta.is_dir();
    DirectoryItem {
        name,
        absolute_path: path.display().to_string(),
        kind: if is_dir { ItemKind::Directory } else { ItemKind::File },
        size: (!is_dir).then_some(meta.len()),
        last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
    }
}

fn map_io(path: &Path, e: std::io::Error) -> GatewayError {
    if e.kind() == std::io::ErrorKind::NotFound {
        GatewayError::not_found(path.display().to_string())
    } else {
        GatewayError::Io(e)
    }
}

impl DirectoryBrowser {
    pub fn new(allowlist: PathAllowlist) -> Self {
        Self { allowlist }
    }

    pub fn allowlist(&self) -> &PathAllowlist {
        &self.allowlist
    }

    /// Normalized `path` (the root when absent), or `PermissionDenied`.
    pub fn check(&self, path: Option<&str>) -> Result<PathBuf> {
        let target = match path {
            Some(p) if !p.is_empty() => normalize_path(Path::new(p)),
            _ => self.allowlist.root().to_path_buf(),
        };
        if !self.allowlist.is_allowed(&target) {
            return Err(GatewayError::PermissionDenied {
                path: target.display().to_string(),
            });
        }
        Ok(target)
    }

    #[instrument(skip(self))]
    pub async fn list(&self, path: Option<&str>) -> Result<DirectoryListing> {
        let target = self.check(path)?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| map_io(&target, e))?;
        if !meta.is_dir() {
            return Err(GatewayError::BadRequest(format!(
                "{} is not a directory",
                target.display()
            )));
        }

        let mut entries = tokio::fs::read_dir(&target)
            .await
            .map_err(|e| map_io(&target, e))?;
        let mut items = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %target.display(), error = %e, "cannot read directory entry");
                    break;
                }
            };
            let child = entry.path();
            // Children outside the allowlist are hidden (e.g. siblings of
            // the allowed roots when listing the root itself).
            if !self.allowlist.is_allowed(&child) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match tokio::fs::metadata(&child).await {
                Ok(meta) => items.push(item_from_metadata(name, &child, &meta)),
                Err(e) => warn!(path = %child.display(), error = %e, "cannot access item"),
            }
        }
        sort_directory_items(&mut items);

        let parent_path = (target != self.allowlist.root())
            .then(|| target.parent().map(|p| p.display().to_string()))
            .flatten();

        Ok(DirectoryListing {
            current_path: target.display().to_string(),
            parent_path,
            total_items: items.len(),
            items,
        })
    }

    #[instrument(skip(self))]
    pub async fn stat(&self, path: &str) -> Result<DirectoryItem> {
        let target = self.check(Some(path))?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| map_io(&target, e))?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| target.display().to_string());
        Ok(item_from_metadata(name, &target, &meta))
    }

    /// Depth-limited search for files whose name matches `pattern`.
    ///
    /// Depth 1 searches only the starting directory. Unreadable entries are
    /// logged and skipped.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        path: Option<&str>,
        pattern: &str,
        max_depth: usize,
    ) -> Result<Vec<DirectoryItem>> {
        if pattern.is_empty() {
            return Err(GatewayError::BadRequest("fileName pattern is required".into()));
        }
        let start = self.check(path)?;

        let mut results = Vec::new();
        // Explicit stack keeps the traversal depth-first without async recursion.
        let mut stack = vec![(start, 0usize)];
        while let Some((dir, depth)) = stack.pop() {
            if depth >= max_depth {
                continue;
            }
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "cannot read directory");
                    continue;
                }
            };

            let mut subdirs = Vec::new();
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = %dir.display(), error = %e, "cannot read directory entry");
                        break;
                    }
                };
                let child = entry.path();
                if !self.allowlist.is_allowed(&child) {
                    continue;
                }
                let meta = match tokio::fs::metadata(&child).await {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(path = %child.display(), error = %e, "cannot access item");
                        continue;
                    }
                };
                let name = entry.file_name().to_string_lossy().into_owned();
                if meta.is_dir() {
                    subdirs.push(child);
                } else if meta.is_file() && glob_match(pattern, &name) {
                    results.push(item_from_metadata(name, &child, &meta));
                }
            }
            // Reverse so the first subdirectory is visited first.
            subdirs.sort();
            stack.extend(subdirs.into_iter().rev().map(|d| (d, depth + 1)));
        }
        Ok(results)
    }

    pub fn available_paths(&self) -> AvailablePaths {
        let root = self.allowlist.root();
        let entry = |name: &str, dir: &str, description: &str| AvailablePath {
            name: name.to_string(),
            path: root.join(dir).display().to_string(),
            description: description.to_string(),
        };
        AvailablePaths {
            root_path: root.display().to_string(),
            available_paths: vec![
                entry("Datasets", "Datasets", "Available datasets"),
                entry("Outputs", "outputs", "Execution output files"),
                entry("Uploads", "uploads", "Uploaded config files"),
                entry("UDLF", "udlf", "UDLF binaries and configs"),
            ],
        }
    }
}

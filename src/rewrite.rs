//! Rewrites dataset paths inside a run config so the binary can reach them
//! in the active deployment, and owns the per-execution scratch directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::allowlist::normalize_path;
use crate::config::Deployment;
use crate::error::{GatewayError, Result};
use crate::run_config::RunConfig;
use crate::storage::{mounted_path, object_key, DatasetStore};

pub const SCRATCH_PREFIX: &str = "udlf_exec_";

/// Directory holding one execution's normalized config and downloads.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `udlf_exec_<token>` under `root` with a 64-bit random token.
    pub async fn create(root: &Path) -> Result<Self> {
        let token: u64 = rand::thread_rng().gen();
        let path = root.join(format!("{SCRATCH_PREFIX}{token:016x}"));
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "created scratch directory");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort removal; failures are logged and swallowed.
    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

/// Replace every occurrence of each `from` with its `to` in one left-to-right
/// pass. Longer patterns are tried first and replaced text is never scanned
/// again, so a short pattern cannot rewrite inside a longer replacement.
pub fn replace_all_literal(text: &str, replacements: &[(String, String)]) -> String {
    let mut pairs: Vec<(&str, &str)> = replacements
        .iter()
        .filter(|(from, to)| !from.is_empty() && from != to)
        .map(|(from, to)| (from.as_str(), to.as_str()))
        .collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
    pairs.dedup_by(|a, b| a.0 == b.0);

    if pairs.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'scan: while !rest.is_empty() {
        for (from, to) in &pairs {
            if let Some(tail) = rest.strip_prefix(from) {
                out.push_str(to);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            out.push(ch);
        }
        rest = chars.as_str();
    }
    out
}

fn looks_like_file(value: &str) -> bool {
    !value.ends_with('/') && Path::new(value).extension().is_some()
}

/// Output of a rewrite: the config the binary will actually read.
#[derive(Debug)]
pub struct RewrittenConfig {
    pub bytes: Vec<u8>,
    /// Path of the normalized config inside `scratch`.
    pub config_path: PathBuf,
    pub scratch: ScratchDir,
    /// Number of distinct path values that were substituted.
    pub replaced: usize,
}

#[derive(Clone)]
pub struct PathRewriter {
    store: DatasetStore,
    scratch_root: PathBuf,
}

impl PathRewriter {
    pub fn new(store: DatasetStore, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            scratch_root: scratch_root.into(),
        }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// Rewrite `config_bytes` for the store's deployment and write the result
    /// into a fresh scratch directory as `file_name`.
    ///
    /// The scratch directory is removed again if the rewrite fails; on
    /// success the caller owns it.
    #[instrument(skip(self, config_bytes), fields(deployment = ?self.store.deployment()))]
    pub async fn rewrite_for_deployment(
        &self,
        config_bytes: &[u8],
        file_name: &str,
    ) -> Result<RewrittenConfig> {
        let scratch = ScratchDir::create(&self.scratch_root).await?;
        match self.rewrite_into(config_bytes, file_name, &scratch).await {
            Ok((bytes, config_path, replaced)) => Ok(RewrittenConfig {
                bytes,
                config_path,
                scratch,
                replaced,
            }),
            Err(e) => {
                scratch.remove().await;
                Err(e)
            }
        }
    }

    async fn rewrite_into(
        &self,
        config_bytes: &[u8],
        file_name: &str,
        scratch: &ScratchDir,
    ) -> Result<(Vec<u8>, PathBuf, usize)> {
        let replacements = self.replacements(config_bytes, scratch).await?;
        let bytes = if replacements.is_empty() {
            config_bytes.to_vec()
        } else {
            let text = String::from_utf8_lossy(config_bytes);
            replace_all_literal(&text, &replacements).into_bytes()
        };

        let config_path = scratch.path().join(file_name);
        tokio::fs::write(&config_path, &bytes).await?;
        info!(
            config = %config_path.display(),
            replaced = replacements.len(),
            "wrote normalized config"
        );
        Ok((bytes, config_path, replacements.len()))
    }

    /// `(original, replacement)` pairs for the path values of a config.
    async fn replacements(
        &self,
        config_bytes: &[u8],
        scratch: &ScratchDir,
    ) -> Result<Vec<(String, String)>> {
        let config = RunConfig::parse(config_bytes);
        let mut seen = HashSet::new();
        let values: Vec<&str> = config
            .path_entries()
            .map(|(_, value)| value)
            .filter(|value| seen.insert(*value))
            .collect();

        let mut out = Vec::new();
        match self.store.deployment() {
            Deployment::Local => {}
            Deployment::Mounted => {
                let prefix = self.store.mount_prefix().unwrap_or_default();
                for value in values {
                    if let Some(mounted) = mounted_path(prefix, value) {
                        out.push((value.to_string(), mounted));
                    }
                }
            }
            Deployment::Blob => {
                let downloads = values
                    .into_iter()
                    .filter(|v| looks_like_file(v))
                    .map(|value| self.fetch_into_scratch(value, scratch));
                out.extend(
                    futures::future::try_join_all(downloads)
                        .await?
                        .into_iter()
                        .flatten(),
                );
            }
        }
        Ok(out)
    }

    /// Download one referenced object into `scratch`, mirroring its key.
    /// Objects missing from the bucket are left for the binary to report.
    async fn fetch_into_scratch(
        &self,
        value: &str,
        scratch: &ScratchDir,
    ) -> Result<Option<(String, String)>> {
        let key = object_key(value);
        let dest = scratch.path().join(&key);
        if !normalize_path(&dest).starts_with(normalize_path(scratch.path())) {
            warn!(path = %value, key = %key, "object key escapes the scratch directory");
            return Err(GatewayError::BadRequest(format!(
                "dataset path {value} resolves outside the execution directory"
            )));
        }
        if !self.store.exists(value).await? {
            warn!(path = %value, key = %key, "object not found in bucket, leaving path unchanged");
            return Ok(None);
        }
        let size = self.store.download_to(value, &dest).await?;
        debug!(key = %key, dest = %dest.display(), size, "downloaded dataset file");
        Ok(Some((value.to_string(), dest.display().to_string())))
    }
}

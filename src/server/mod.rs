pub mod handlers;
pub mod routes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::allowlist::PathAllowlist;
use crate::browser::DirectoryBrowser;
use crate::cache::DatasetCache;
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::execution::ExecutionDriver;
use crate::rewrite::PathRewriter;
use crate::run_config::DatasetPaths;
use crate::storage::DatasetStore;

/// Shared application state injected into all handlers via axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: DatasetStore,
    pub cache: Arc<DatasetCache>,
    pub driver: Arc<ExecutionDriver>,
    pub browser: Arc<DirectoryBrowser>,
}

/// Reduce a client-supplied file name to its final component. Directory
/// parts are dropped; `..`, `.` and empty names are rejected.
pub fn file_component(name: &str) -> Result<String> {
    Path::new(name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| GatewayError::BadRequest(format!("invalid file name: {name:?}")))
}

impl AppState {
    /// Wire every component from the service configuration and a store.
    pub fn new(config: Config, store: DatasetStore) -> Self {
        let allowlist = PathAllowlist::new(&config.paths.root, config.paths.allowed_roots.clone());
        let rewriter = PathRewriter::new(store.clone(), config.execution.scratch_root.clone());
        let driver = ExecutionDriver::new(&config.execution, config.paths.outputs_dir.clone(), rewriter);
        let cache = DatasetCache::new(DatasetPaths::defaults(&config.paths.datasets_path));

        Self {
            store,
            cache: Arc::new(cache),
            driver: Arc::new(driver),
            browser: Arc::new(DirectoryBrowser::new(allowlist)),
            config: Arc::new(config),
        }
    }

    /// Absolute path of an uploaded config.
    pub fn config_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.config.paths.uploads_dir.join(file_component(name)?))
    }

    /// Absolute path of a file in the outputs directory.
    pub fn output_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.config.paths.outputs_dir.join(file_component(name)?))
    }

    /// Config path for an optional `configFile` query value.
    pub fn optional_config_path(&self, name: Option<&str>) -> Result<Option<PathBuf>> {
        name.filter(|n| !n.is_empty())
            .map(|n| self.config_path(n))
            .transpose()
    }
}

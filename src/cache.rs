//! Process-lifetime memoization of parsed run configs and dataset indexes.
//!
//! Entries are keyed by config path and live until explicitly invalidated.
//! Concurrent misses on one key are collapsed into a single build.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::dataset::DatasetIndex;
use crate::error::Result;
use crate::run_config::{DatasetPaths, RunConfig};
use crate::storage::DatasetStore;

pub struct KeyedCache<V> {
    name: &'static str,
    entries: DashMap<String, Arc<V>>,
    /// Per-key locks so only one build runs per key.
    build_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<V> KeyedCache<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            build_locks: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn put(&self, key: &str, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries.insert(key.to_string(), value.clone());
        value
    }

    /// Remove one key, or everything when `key` is `None`. Returns the number
    /// of entries removed.
    pub fn invalidate(&self, key: Option<&str>) -> usize {
        match key {
            Some(key) => {
                self.build_locks.remove(key);
                usize::from(self.entries.remove(key).is_some())
            }
            None => {
                let count = self.entries.len();
                self.entries.clear();
                self.build_locks.clear();
                count
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn build_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.build_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn record(&self, result: &str) {
        crate::metrics::CACHE_LOOKUPS_TOTAL
            .with_label_values(&[self.name, result])
            .inc();
    }

    /// Return the cached value for `key`, building it with `build` on a miss.
    /// A failed build caches nothing.
    pub async fn get_or_try_build<F, Fut>(&self, key: &str, build: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key) {
            self.record("hit");
            return Ok(value);
        }

        let lock = self.build_lock(key);
        let _guard = lock.lock().await;

        // Another caller may have finished the build while we waited.
        if let Some(value) = self.get(key) {
            self.record("hit");
            return Ok(value);
        }
        self.record("miss");

        let value = build().await?;
        debug!(cache = self.name, key, "cached entry");
        Ok(self.put(key, value))
    }
}

/// Parsed configs and dataset indexes for uploaded run configs.
pub struct DatasetCache {
    configs: KeyedCache<RunConfig>,
    indexes: KeyedCache<DatasetIndex>,
    /// Dataset paths used when a request names no config.
    default_paths: DatasetPaths,
}

const DEFAULT_KEY: &str = "<default>";

fn cache_key(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| DEFAULT_KEY.to_string())
}

impl DatasetCache {
    pub fn new(default_paths: DatasetPaths) -> Self {
        Self {
            configs: KeyedCache::new("config"),
            indexes: KeyedCache::new("index"),
            default_paths,
        }
    }

    pub async fn config(&self, config_path: &Path) -> Result<Arc<RunConfig>> {
        let key = cache_key(Some(config_path));
        self.configs
            .get_or_try_build(&key, || RunConfig::load(config_path))
            .await
    }

    /// Dataset paths named by a config, or the defaults when there is none.
    pub async fn dataset_paths(&self, config_path: Option<&Path>) -> Result<DatasetPaths> {
        match config_path {
            Some(path) => Ok(self.config(path).await?.dataset_paths()),
            None => Ok(self.default_paths.clone()),
        }
    }

    #[instrument(skip(self, store), fields(config = %cache_key(config_path)))]
    pub async fn index(
        &self,
        store: &DatasetStore,
        config_path: Option<&Path>,
    ) -> Result<Arc<DatasetIndex>> {
        let key = cache_key(config_path);
        self.indexes
            .get_or_try_build(&key, || async {
                let paths = self.dataset_paths(config_path).await?;
                DatasetIndex::load(store, &paths).await
            })
            .await
    }

    /// Drop cached entries for one config, or for all configs.
    pub fn invalidate(&self, config_path: Option<&Path>) -> usize {
        let key = config_path.map(|p| p.display().to_string());
        let removed = self.configs.invalidate(key.as_deref()) + self.indexes.invalidate(key.as_deref());
        info!(
            config = key.as_deref().unwrap_or("*"),
            removed,
            "cache invalidated"
        );
        removed
    }

    pub fn cached_configs(&self) -> Vec<String> {
        self.configs.keys()
    }
}

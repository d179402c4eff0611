//! Dataset file access across deployments.
//!
//! `DatasetStore` is a cheaply cloneable handle over one of three backends:
//! the local filesystem, a bucket mounted under a prefix, or the bucket
//! itself reached through `object_store`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use bytes::Bytes;
use dashmap::DashMap;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use futures::StreamExt;
use object_store::ObjectStore;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::{Deployment, StorageConfig};
use crate::error::{GatewayError, Result};
use crate::types::{sort_directory_items, DirectoryItem, DirectoryListing, ItemKind};

const OBJECT_ROOT: &str = "app/";

/// Object key for a dataset path: no leading `/`, always under `app/`.
pub fn object_key(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.starts_with(OBJECT_ROOT) {
        trimmed.to_string()
    } else {
        format!("{OBJECT_ROOT}{trimmed}")
    }
}

/// Location of a dataset path under a bucket mount, if the path refers to
/// bucket content at all.
pub fn mounted_path(mount_prefix: &str, path: &str) -> Option<String> {
    let mount = mount_prefix.trim_end_matches('/');
    if path.starts_with("app/") {
        Some(format!("{mount}/{path}"))
    } else if path.starts_with("Datasets/") {
        Some(format!("{mount}/app/{path}"))
    } else if path.starts_with("/app/") {
        Some(format!("{mount}{path}"))
    } else {
        None
    }
}

struct BlobBackend {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    /// Downloaded bytes by object key.
    read_cache: DashMap<String, Bytes>,
}

enum Backend {
    Local,
    Mounted { mount_prefix: String },
    Blob(BlobBackend),
}

#[derive(Clone)]
pub struct DatasetStore {
    backend: Arc<Backend>,
}

async fn read_fs(path: &Path) -> Result<Bytes> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(GatewayError::not_found(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn copy_fs(from: &Path, to: &Path) -> Result<u64> {
    match tokio::fs::copy(from, to).await {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(GatewayError::not_found(from.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

impl BlobBackend {
    async fn fetch(&self, key: &str) -> Result<Bytes> {
        let result = match self.store.get(&ObjectPath::from(key)).await {
            Ok(r) => r.bytes().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(data) => {
                crate::metrics::BLOB_DOWNLOADS_TOTAL
                    .with_label_values(&["ok"])
                    .inc();
                debug!(key = %key, bytes = data.len(), "downloaded object");
                Ok(data)
            }
            Err(e) => {
                crate::metrics::BLOB_DOWNLOADS_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                Err(e.into())
            }
        }
    }

    async fn stream_to(&self, key: &str, dest: &Path) -> Result<u64> {
        let mut stream = self.store.get(&ObjectPath::from(key)).await?.into_stream();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(key = %key, bytes = written, dest = %dest.display(), "streamed object to disk");
        Ok(written)
    }
}

async fn exists_fs(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

impl DatasetStore {
    pub fn local() -> Self {
        Self {
            backend: Arc::new(Backend::Local),
        }
    }

    pub fn mounted(mount_prefix: impl Into<String>) -> Self {
        Self {
            backend: Arc::new(Backend::Mounted {
                mount_prefix: mount_prefix.into(),
            }),
        }
    }

    pub fn blob(store: Arc<dyn ObjectStore>, signer: Option<Arc<dyn Signer>>) -> Self {
        Self {
            backend: Arc::new(Backend::Blob(BlobBackend {
                store,
                signer,
                read_cache: DashMap::new(),
            })),
        }
    }

    /// Build the store selected by the service configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            Deployment::Local => Ok(Self::local()),
            Deployment::Mounted => {
                info!(mount_prefix = %config.mount_prefix, "using mounted bucket");
                Ok(Self::mounted(config.mount_prefix.clone()))
            }
            Deployment::Blob => {
                let mut builder = object_store::gcp::GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(&config.bucket);
                if let Some(ref creds) = config.credentials_path {
                    builder = builder.with_service_account_path(creds);
                }
                let gcs = Arc::new(builder.build()?);
                info!(
                    bucket = %config.bucket,
                    project_id = %config.project_id,
                    key_file = config.credentials_path.as_deref().unwrap_or("default credentials"),
                    "connected to bucket"
                );
                let signer: Arc<dyn Signer> = gcs.clone();
                Ok(Self::blob(gcs, Some(signer)))
            }
        }
    }

    pub fn deployment(&self) -> Deployment {
        match &*self.backend {
            Backend::Local => Deployment::Local,
            Backend::Mounted { .. } => Deployment::Mounted,
            Backend::Blob(_) => Deployment::Blob,
        }
    }

    /// Mount prefix of the mounted backend.
    pub fn mount_prefix(&self) -> Option<&str> {
        match &*self.backend {
            Backend::Mounted { mount_prefix } => Some(mount_prefix),
            _ => None,
        }
    }

    fn mounted_location(mount_prefix: &str, path: &str) -> String {
        mounted_path(mount_prefix, path).unwrap_or_else(|| path.to_string())
    }

    /// Read a whole file. Blob objects are fetched every time.
    #[instrument(skip(self), fields(deployment = ?self.deployment()))]
    pub async fn read(&self, path: &str) -> Result<Bytes> {
        match &*self.backend {
            Backend::Local => read_fs(Path::new(path)).await,
            Backend::Mounted { mount_prefix } => {
                let location = Self::mounted_location(mount_prefix, path);
                read_fs(Path::new(&location)).await
            }
            Backend::Blob(blob) => {
                let key = object_key(path);
                blob.fetch(&key).await
            }
        }
    }

    /// Read a dataset list or classes file. Blob reads are memoized by
    /// object key until `clear_read_cache`.
    #[instrument(skip(self), fields(deployment = ?self.deployment()))]
    pub async fn read_memoized(&self, path: &str) -> Result<Bytes> {
        let Backend::Blob(blob) = &*self.backend else {
            return self.read(path).await;
        };

        let key = object_key(path);
        if let Some(data) = blob.read_cache.get(&key) {
            crate::metrics::CACHE_LOOKUPS_TOTAL
                .with_label_values(&["blob_read", "hit"])
                .inc();
            return Ok(data.clone());
        }
        crate::metrics::CACHE_LOOKUPS_TOTAL
            .with_label_values(&["blob_read", "miss"])
            .inc();

        let data = blob.fetch(&key).await?;
        blob.read_cache.insert(key, data.clone());
        Ok(data)
    }

    /// Number of memoized blob reads.
    pub fn read_cache_len(&self) -> usize {
        match &*self.backend {
            Backend::Blob(blob) => blob.read_cache.len(),
            _ => 0,
        }
    }

    #[instrument(skip(self), fields(deployment = ?self.deployment()))]
    pub async fn exists(&self, path: &str) -> Result<bool> {
        match &*self.backend {
            Backend::Local => Ok(exists_fs(Path::new(path)).await),
            Backend::Mounted { mount_prefix } => {
                let location = Self::mounted_location(mount_prefix, path);
                Ok(exists_fs(Path::new(&location)).await)
            }
            Backend::Blob(blob) => {
                let key = object_key(path);
                match blob.store.head(&ObjectPath::from(key.as_str())).await {
                    Ok(_) => Ok(true),
                    Err(object_store::Error::NotFound { .. }) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Time-limited read URL for an object. Blob backend only.
    pub async fn signed_url(&self, path: &str, ttl: Duration) -> Result<Url> {
        match &*self.backend {
            Backend::Blob(BlobBackend {
                signer: Some(signer),
                ..
            }) => {
                let key = object_key(path);
                Ok(signer
                    .signed_url(Method::GET, &ObjectPath::from(key.as_str()), ttl)
                    .await?)
            }
            Backend::Blob(_) => Err(GatewayError::Unsupported(
                "this bucket client cannot sign URLs".into(),
            )),
            _ => Err(GatewayError::Unsupported(
                "signed URLs require the blob backend".into(),
            )),
        }
    }

    /// Copy `path` to `dest`, creating parent directories. Blob objects are
    /// streamed to disk chunk by chunk and never memoized.
    pub async fn download_to(&self, path: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match &*self.backend {
            Backend::Local => copy_fs(Path::new(path), dest).await,
            Backend::Mounted { mount_prefix } => {
                let location = Self::mounted_location(mount_prefix, path);
                copy_fs(Path::new(&location), dest).await
            }
            Backend::Blob(blob) => {
                let key = object_key(path);
                let result = blob.stream_to(&key, dest).await;
                let outcome = if result.is_ok() { "ok" } else { "error" };
                crate::metrics::BLOB_DOWNLOADS_TOTAL
                    .with_label_values(&[outcome])
                    .inc();
                result
            }
        }
    }

    /// List one level of the bucket under `prefix`. Blob backend only.
    #[instrument(skip(self))]
    pub async fn list_directory(&self, prefix: Option<&str>) -> Result<DirectoryListing> {
        let Backend::Blob(blob) = &*self.backend else {
            return Err(GatewayError::Unsupported(
                "bucket listing requires the blob backend".into(),
            ));
        };

        let normalized = prefix
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_default();
        let list_prefix = (!normalized.is_empty()).then(|| ObjectPath::from(normalized.as_str()));
        let listing = blob.store.list_with_delimiter(list_prefix.as_ref()).await?;

        let mut items = Vec::with_capacity(listing.common_prefixes.len() + listing.objects.len());
        for dir in listing.common_prefixes {
            let full = dir.to_string();
            let name = full.rsplit('/').next().unwrap_or(&full).to_string();
            items.push(DirectoryItem {
                name,
                absolute_path: format!("{full}/"),
                kind: ItemKind::Directory,
                size: None,
                last_modified: None,
            });
        }
        for object in listing.objects {
            let full = object.location.to_string();
            let name = full.rsplit('/').next().unwrap_or(&full).to_string();
            items.push(DirectoryItem {
                name,
                absolute_path: full,
                kind: ItemKind::File,
                size: Some(object.size as u64),
                last_modified: Some(object.last_modified),
            });
        }
        sort_directory_items(&mut items);

        let parent_path = if normalized.is_empty() {
            None
        } else {
            Some(
                normalized
                    .rsplit_once('/')
                    .map(|(parent, _)| parent.to_string())
                    .unwrap_or_default(),
            )
        };

        Ok(DirectoryListing {
            current_path: normalized,
            parent_path,
            total_items: items.len(),
            items,
        })
    }

    /// Drop memoized blob reads. No-op for filesystem backends.
    pub fn clear_read_cache(&self) -> usize {
        match &*self.backend {
            Backend::Blob(blob) => {
                let count = blob.read_cache.len();
                blob.read_cache.clear();
                if count > 0 {
                    debug!(count, "cleared blob read cache");
                }
                count
            }
            _ => 0,
        }
    }
}

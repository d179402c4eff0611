//! Service configuration.
//!
//! Defaults are container-aware, a TOML file may override them, and a fixed
//! set of environment variables overrides both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Where dataset files physically live for this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deployment {
    /// Plain local filesystem.
    #[default]
    Local,
    /// Blob bucket mounted into the filesystem under `mount_prefix`.
    Mounted,
    /// Objects downloaded on demand from the bucket.
    Blob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_body_bytes: 16 * 1024 * 1024,
            cors_origins: Vec::new(),
            default_page_size: 10,
            max_page_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the directory browser.
    pub root: PathBuf,
    pub uploads_dir: PathBuf,
    pub outputs_dir: PathBuf,
    /// Base for the default dataset subpaths (`APP_DATASETS_PATH`).
    pub datasets_path: PathBuf,
    pub allowed_roots: Vec<PathBuf>,
    pub container_marker: PathBuf,
}

impl PathsConfig {
    /// Containerized roots when `marker` exists, cwd-relative roots otherwise.
    pub fn for_environment(marker: &Path, cwd: &Path) -> Self {
        if marker.exists() {
            Self {
                root: "/app".into(),
                uploads_dir: "/app/uploads".into(),
                outputs_dir: "/app/outputs".into(),
                datasets_path: "/app/datasets".into(),
                allowed_roots: vec!["/app/Datasets".into()],
                container_marker: marker.to_path_buf(),
            }
        } else {
            Self {
                root: cwd.to_path_buf(),
                uploads_dir: cwd.join("uploads"),
                outputs_dir: cwd.join("outputs"),
                datasets_path: "/app/datasets".into(),
                allowed_roots: vec![cwd.join("Datasets"), cwd.join("outputs"), cwd.join("uploads")],
                container_marker: marker.to_path_buf(),
            }
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::for_environment(Path::new(DEFAULT_CONTAINER_MARKER), &cwd)
    }
}

pub const DEFAULT_CONTAINER_MARKER: &str = "/.dockerenv";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Deployment,
    pub mount_prefix: String,
    pub bucket: String,
    pub project_id: String,
    /// Service account key file. Unset means ambient credentials.
    pub credentials_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Deployment::Local,
            mount_prefix: "/mnt/gcs".into(),
            bucket: String::new(),
            project_id: String::new(),
            credentials_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub executable: PathBuf,
    /// Parent of the per-execution scratch directories.
    pub scratch_root: PathBuf,
    /// Time between SIGTERM and a forced kill for cancelled executions.
    pub kill_grace_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            executable: "/app/udlf/bin/udlf".into(),
            scratch_root: std::env::temp_dir(),
            kill_grace_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub storage: StorageConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

/// Environment lookup, injectable for tests.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the
    /// process environment.
    ///
    /// The file is `path` if given, else `$UDLF_CONFIG`, else `udlf.toml` in
    /// the working directory when it exists.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path
            .map(PathBuf::from)
            .or_else(|| ProcessEnv.var("UDLF_CONFIG").map(PathBuf::from))
            .or_else(|| {
                let local = PathBuf::from("udlf.toml");
                local.exists().then_some(local)
            });

        let mut config = match file {
            Some(file) => {
                let text = std::fs::read_to_string(&file).map_err(|e| {
                    GatewayError::Config(format!("failed to read {}: {e}", file.display()))
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };

        config.apply_env(&ProcessEnv);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GatewayError::Config(e.to_string()))
    }

    pub fn apply_env(&mut self, env: &dyn EnvSource) {
        if let Some(host) = env.var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = env.var("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(exe) = env.var("EXECUTABLE_PATH") {
            self.execution.executable = exe.into();
        }
        if let Some(datasets) = env.var("APP_DATASETS_PATH") {
            self.paths.datasets_path = datasets.into();
        }
        if let Some(bucket) = env.var("GCS_BUCKET_NAME") {
            self.storage.bucket = bucket;
        }
        if let Some(project) = env.var("GCS_PROJECT_ID") {
            self.storage.project_id = project;
        }
        if let Some(prefix) = env.var("GCS_MOUNT_PREFIX") {
            self.storage.mount_prefix = prefix;
        }
        if let Some(level) = env.var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env.var("LOG_FORMAT") {
            self.logging.format = format;
        }

        let managed_container = env.var("K_SERVICE").is_some();
        // Managed containers authenticate with their service identity.
        if !managed_container {
            if let Some(creds) = env.var("GOOGLE_APPLICATION_CREDENTIALS") {
                self.storage.credentials_path = Some(creds);
            }
        }

        let demo = env
            .var("API_MODE")
            .is_some_and(|m| m.eq_ignore_ascii_case("demo"));
        if demo {
            self.storage.backend = Deployment::Blob;
        } else if managed_container {
            self.storage.backend = Deployment::Mounted;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(GatewayError::Config("server.port must be > 0".into()));
        }
        if self.server.max_page_size == 0 {
            return Err(GatewayError::Config(
                "server.max_page_size must be > 0".into(),
            ));
        }
        match self.storage.backend {
            Deployment::Blob if self.storage.bucket.is_empty() => Err(GatewayError::Config(
                "storage.bucket is required for the blob backend".into(),
            )),
            Deployment::Mounted if self.storage.mount_prefix.is_empty() => {
                Err(GatewayError::Config(
                    "storage.mount_prefix is required for the mounted backend".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tempfile::TempDir;
use tokio::net::TcpListener;

use udlf_gateway::config::{Config, PathsConfig};
use udlf_gateway::server::routes::build_router;
use udlf_gateway::server::AppState;
use udlf_gateway::storage::DatasetStore;

/// List file of the fixture dataset, one image per line.
pub const DATASET_LIST: &str = "apple-1.gif\napple-2.gif\nbat-1.gif\nbat-2.gif\ncup-1.gif\n";

/// Classes file of the fixture dataset. `ghost.gif` is not in the list file.
pub const DATASET_CLASSES: &str =
    "apple-1.gif:apple\napple-2.gif:apple\nbat-1.gif:bat\nbat-2.gif:bat\ncup-1.gif:cup\nghost.gif:cup\n";

/// Bytes of the fixture image `apple-1.gif`.
pub const IMAGE_BYTES: &[u8] = b"GIF89a-fixture";

/// Absolute paths of a dataset written by the harness.
#[derive(Debug, Clone)]
pub struct DatasetFixture {
    pub list: PathBuf,
    pub classes: PathBuf,
    pub images: PathBuf,
}

/// Isolated filesystem layout for one test: browsing root, uploads,
/// outputs, datasets and scratch all live under a fresh temp directory.
pub struct TestHarness {
    pub dir: TempDir,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir.path().to_path_buf();

        let mut config = Config::default();
        config.paths = PathsConfig::for_environment(&root.join("not-a-container"), &root);
        config.paths.datasets_path = root.join("Datasets");
        config.execution.scratch_root = root.join("scratch");
        config.execution.executable = root.join("bin").join("udlf");
        config.execution.kill_grace_ms = 500;

        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` at `rel` under the root, creating parents.
    pub fn write(&self, rel: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create fixture dir");
        }
        std::fs::write(&path, contents).expect("failed to write fixture");
        path
    }

    /// Write the fixture dataset at the default location under `Datasets/mpeg7`.
    pub fn write_dataset(&self) -> DatasetFixture {
        let list = self.write("Datasets/mpeg7/lists_mpeg7.txt", DATASET_LIST);
        let classes = self.write("Datasets/mpeg7/classes_mpeg7.txt", DATASET_CLASSES);
        self.write("Datasets/mpeg7/original/apple-1.gif", IMAGE_BYTES);
        DatasetFixture {
            list,
            classes,
            images: self.root().join("Datasets/mpeg7/original"),
        }
    }

    /// Write an uploaded run config named `name` pointing at `dataset`.
    pub fn write_run_config(&self, name: &str, dataset: &DatasetFixture) -> PathBuf {
        let body = format!(
            "# UDLF run config\n\
             UDL_TASK = UDL ## Select the task\n\
             UDL_METHOD = CPRR\n\
             INPUT_FILE = {}\n\
             INPUT_FILE_LIST = {}\n\
             INPUT_FILE_CLASSES = {}\n\
             INPUT_IMAGES_PATH = {}\n\
             PARAM_CPRR_K = 20\n\
             OUTPUT_FILE = TRUE\n",
            self.root().join("Datasets/mpeg7/matrix.txt").display(),
            dataset.list.display(),
            dataset.classes.display(),
            dataset.images.display(),
        );
        self.write(&format!("uploads/{name}"), body)
    }

    /// Install a `/bin/sh` script as the UDLF executable. The script gets
    /// the config path as `$1` and runs in the outputs directory.
    #[cfg(unix)]
    pub fn install_fake_udlf(&self, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.config.execution.executable.clone();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create bin dir");
        }
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
        path
    }

    pub fn state(&self, store: DatasetStore) -> AppState {
        AppState::new(self.config.clone(), store)
    }

    /// Start a server on a random port, returning its base URL.
    pub async fn start_server(&self, store: DatasetStore) -> String {
        let app = build_router(self.state(store));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener.local_addr().expect("listener has no address");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server error");
        });

        format!("http://{addr}")
    }
}

/// An in-memory bucket and a Blob store over it.
pub fn blob_store() -> (Arc<InMemory>, DatasetStore) {
    let bucket = Arc::new(InMemory::new());
    let store = DatasetStore::blob(bucket.clone(), None);
    (bucket, store)
}

pub async fn put_object(bucket: &InMemory, key: &str, data: impl Into<Bytes>) {
    let data: Bytes = data.into();
    bucket
        .put(&ObjectPath::from(key), data.into())
        .await
        .expect("put should succeed");
}

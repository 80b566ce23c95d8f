use anyhow::{Context, Result};
use directories::BaseDirs;
use magicapp_core::storage::{FileStore, KeyValueStore, LayeredStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const NATIVE_STORE_FILE: &str = "preferences.json";
const WEB_STORE_FILE: &str = "local_storage.json";

/// On-disk locations used by the command-line client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn user() -> Self {
        Self::at(config_dir())
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn native_store(&self) -> PathBuf {
        self.root.join(NATIVE_STORE_FILE)
    }

    pub fn web_store(&self) -> PathBuf {
        self.root.join(WEB_STORE_FILE)
    }

    /// Both stores layered, native first.
    pub async fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create directory {}", self.root.display()))?;
        let native: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(self.native_store()));
        let web: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(self.web_store()));
        Ok(Arc::new(LayeredStore::new(native, web)))
    }
}

fn config_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.config_dir().join("magicapp")
    } else {
        PathBuf::from(".magicapp")
    }
}

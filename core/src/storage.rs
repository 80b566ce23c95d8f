use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const THEME_MODE_KEY: &str = "magicappdev_theme_mode";

/// Persistent string key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> ClientResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    async fn remove(&self, key: &str) -> ClientResult<()>;
    async fn clear(&self) -> ClientResult<()>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.entries.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> ClientResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> ClientResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// A single JSON object on disk. The file is created on first write.
#[derive(Clone)]
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> ClientResult<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|err| {
                ClientError::Storage(format!("invalid store {}: {err}", self.path.display()))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(ClientError::Storage(format!(
                "failed to read {}: {err}",
                self.path.display()
            ))),
        }
    }

    async fn write_entries(&self, entries: &BTreeMap<String, String>) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                ClientError::Storage(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        let serialized = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&self.path, serialized)
            .await
            .map_err(|err| {
                ClientError::Storage(format!("failed to write {}: {err}", self.path.display()))
            })
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_entries().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.insert(key.to_owned(), value.to_owned());
        self.write_entries(&entries).await
    }

    async fn remove(&self, key: &str) -> ClientResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> ClientResult<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ClientError::Storage(format!(
                "failed to remove {}: {err}",
                self.path.display()
            ))),
        }
    }
}

/// Native preference store backed by a web-local store.
///
/// Writes go to both stores. Reads prefer the primary store and fall back
/// when it has nothing or fails, so a write only succeeds when the primary
/// cannot go on serving a different value for the key.
#[derive(Clone)]
pub struct LayeredStore {
    primary: Arc<dyn KeyValueStore>,
    fallback: Arc<dyn KeyValueStore>,
}

impl LayeredStore {
    pub fn new(primary: Arc<dyn KeyValueStore>, fallback: Arc<dyn KeyValueStore>) -> Self {
        Self { primary, fallback }
    }

    /// Whether a readable primary still holds something other than `expected`.
    async fn primary_shadows(&self, key: &str, expected: Option<&str>) -> bool {
        match self.primary.get(key).await {
            Ok(current) => current.is_some() && current.as_deref() != expected,
            Err(_) => false,
        }
    }

    /// Resolve a write whose primary half failed with `err`.
    async fn recover_primary(
        &self,
        op: &str,
        key: &str,
        expected: Option<&str>,
        err: ClientError,
        fallback: ClientResult<()>,
    ) -> ClientResult<()> {
        if self.primary_shadows(key, expected).await {
            warn!(%err, "op" = op, "key" = key, "primary storage kept a stale value");
            return Err(err);
        }
        match fallback {
            Ok(()) => {
                warn!(%err, "op" = op, "key" = key, "primary storage failed");
                Ok(())
            }
            Err(other) => {
                warn!(%other, "op" = op, "key" = key, "fallback storage failed");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for LayeredStore {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        match self.primary.get(key).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(err) => warn!(%err, "key" = key, "primary storage read failed"),
        }
        self.fallback.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        let primary = self.primary.set(key, value).await;
        let fallback = self.fallback.set(key, value).await;
        match primary {
            Ok(()) => {
                if let Err(err) = fallback {
                    warn!(%err, "op" = "set", "key" = key, "fallback storage failed");
                }
                Ok(())
            }
            Err(err) => {
                // Drop the old primary value so reads reach the fallback.
                if let Err(remove_err) = self.primary.remove(key).await {
                    debug!(%remove_err, "key" = key, "primary storage rejected removal");
                }
                self.recover_primary("set", key, Some(value), err, fallback)
                    .await
            }
        }
    }

    async fn remove(&self, key: &str) -> ClientResult<()> {
        let primary = self.primary.remove(key).await;
        let fallback = self.fallback.remove(key).await;
        match (primary, fallback) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(err)) => {
                // The fallback still answers reads once the primary is empty.
                warn!(%err, "op" = "remove", "key" = key, "fallback storage failed");
                Err(err)
            }
            (Err(err), fallback) => {
                self.recover_primary("remove", key, None, err, fallback)
                    .await
            }
        }
    }

    async fn clear(&self) -> ClientResult<()> {
        let primary = self.primary.clear().await;
        let fallback = self.fallback.clear().await;
        if let Err(err) = &fallback {
            warn!(%err, "op" = "clear", "fallback storage failed");
        }
        primary.and(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> ClientResult<Option<String>> {
            Err(ClientError::Storage("unavailable".into()))
        }
        async fn set(&self, _key: &str, _value: &str) -> ClientResult<()> {
            Err(ClientError::Storage("unavailable".into()))
        }
        async fn remove(&self, _key: &str) -> ClientResult<()> {
            Err(ClientError::Storage("unavailable".into()))
        }
        async fn clear(&self) -> ClientResult<()> {
            Err(ClientError::Storage("unavailable".into()))
        }
    }

    /// Serves whatever it was seeded with and rejects every change.
    #[derive(Default)]
    struct FrozenStore {
        entries: BTreeMap<String, String>,
    }

    impl FrozenStore {
        fn holding(key: &str, value: &str) -> Self {
            Self {
                entries: BTreeMap::from([(key.to_owned(), value.to_owned())]),
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for FrozenStore {
        async fn get(&self, key: &str) -> ClientResult<Option<String>> {
            Ok(self.entries.get(key).cloned())
        }
        async fn set(&self, _key: &str, _value: &str) -> ClientResult<()> {
            Err(ClientError::Storage("read-only".into()))
        }
        async fn remove(&self, _key: &str) -> ClientResult<()> {
            Err(ClientError::Storage("read-only".into()))
        }
        async fn clear(&self) -> ClientResult<()> {
            Err(ClientError::Storage("read-only".into()))
        }
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("preferences.json");
        let store = FileStore::new(&path);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).await.unwrap(), None);
        store.set(ACCESS_TOKEN_KEY, "a-1").await.unwrap();
        store.set(REFRESH_TOKEN_KEY, "r-1").await.unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(
            reopened.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("a-1")
        );
        reopened.remove(ACCESS_TOKEN_KEY).await.unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).await.unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(), Some("r-1"));

        store.clear().await.unwrap();
        assert!(!path.exists());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn layered_store_writes_both_and_reads_primary_first() {
        let primary = MemoryStore::new();
        let fallback = MemoryStore::new();
        let layered = LayeredStore::new(Arc::new(primary.clone()), Arc::new(fallback.clone()));

        layered.set(THEME_MODE_KEY, "dark").await.unwrap();
        assert_eq!(primary.len(), 1);
        assert_eq!(fallback.len(), 1);

        fallback.set(THEME_MODE_KEY, "light").await.unwrap();
        assert_eq!(layered.get(THEME_MODE_KEY).await.unwrap().as_deref(), Some("dark"));

        primary.remove(THEME_MODE_KEY).await.unwrap();
        assert_eq!(layered.get(THEME_MODE_KEY).await.unwrap().as_deref(), Some("light"));

        layered.remove(THEME_MODE_KEY).await.unwrap();
        assert!(primary.is_empty());
        assert!(fallback.is_empty());
    }

    #[tokio::test]
    async fn layered_store_survives_one_broken_backend() {
        let fallback = MemoryStore::new();
        let layered = LayeredStore::new(Arc::new(BrokenStore), Arc::new(fallback.clone()));
        layered.set(ACCESS_TOKEN_KEY, "a").await.unwrap();
        assert_eq!(layered.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(), Some("a"));

        let both_broken = LayeredStore::new(Arc::new(BrokenStore), Arc::new(BrokenStore));
        assert!(both_broken.set(ACCESS_TOKEN_KEY, "a").await.is_err());
    }

    #[tokio::test]
    async fn layered_store_reports_values_a_frozen_primary_still_serves() {
        let fallback = MemoryStore::new();
        let layered = LayeredStore::new(
            Arc::new(FrozenStore::holding(ACCESS_TOKEN_KEY, "old")),
            Arc::new(fallback.clone()),
        );

        assert!(layered.set(ACCESS_TOKEN_KEY, "new").await.is_err());
        assert!(layered.remove(ACCESS_TOKEN_KEY).await.is_err());
        assert!(fallback.is_empty());

        let empty_primary = LayeredStore::new(
            Arc::new(FrozenStore::default()),
            Arc::new(fallback.clone()),
        );
        empty_primary.set(REFRESH_TOKEN_KEY, "r").await.unwrap();
        assert_eq!(
            empty_primary.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("r")
        );
        empty_primary.remove(REFRESH_TOKEN_KEY).await.unwrap();
        assert_eq!(empty_primary.get(REFRESH_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn layered_remove_fails_when_the_fallback_keeps_the_value() {
        let primary = MemoryStore::new();
        primary.set(ACCESS_TOKEN_KEY, "a").await.unwrap();
        let layered = LayeredStore::new(
            Arc::new(primary.clone()),
            Arc::new(FrozenStore::holding(ACCESS_TOKEN_KEY, "a")),
        );
        assert!(layered.remove(ACCESS_TOKEN_KEY).await.is_err());
        assert!(primary.is_empty());
    }
}

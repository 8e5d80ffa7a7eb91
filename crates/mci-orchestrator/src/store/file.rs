//! Durable record store persisted as a JSON snapshot

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use mci_core::error::StoreError;
use mci_core::traits::RecordStore;

use super::MemoryStore;

/// Record store that rewrites a JSON snapshot file after every change.
///
/// Reads are served from memory. The snapshot is written to a temporary
/// file and renamed over the old one, so a crash never leaves a torn file.
pub struct FileStore {
    path: PathBuf,
    records: MemoryStore,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store, loading an existing snapshot if present
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let snapshot: BTreeMap<String, String> = serde_json::from_str(&content)
                    .map_err(|source| StoreError::Serialization {
                        key: path.display().to_string(),
                        source,
                    })?;
                tracing::info!("Loaded {} records from {:?}", snapshot.len(), path);
                MemoryStore::from_records(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryStore::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            records,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let snapshot: BTreeMap<String, String> = self.records.snapshot().into_iter().collect();
        let content =
            serde_json::to_string_pretty(&snapshot).map_err(|source| StoreError::Serialization {
                key: self.path.display().to_string(),
                source,
            })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.records.get(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.records.list(prefix).await
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.records.put(key, value).await?;
        self.persist().await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let existed = self.records.delete(key).await?;
        if existed {
            self.persist().await?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("fleet.json");

        {
            let store = FileStore::open(&path).await.unwrap();
            store.put("/ns/ns01", "{}".to_string()).await.unwrap();
            store.put("/ns/ns01/mci/m1", "{\"id\":\"m1\"}".to_string()).await.unwrap();
            store.put("/ns/ns02", "{}".to_string()).await.unwrap();
            assert!(store.delete("/ns/ns02").await.unwrap());
        }

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("/ns/ns01/mci/m1").await.unwrap().as_deref(),
            Some("{\"id\":\"m1\"}")
        );
        assert_eq!(reopened.get("/ns/ns02").await.unwrap(), None);
        assert_eq!(reopened.list("/ns/").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileStore::open(&path).await,
            Err(StoreError::Serialization { .. })
        ));
    }
}

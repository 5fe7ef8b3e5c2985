//! File-backed key-value store for the driver session.

use async_trait::async_trait;
use fieldops_core::error::SessionError;
use fieldops_core::ports::KeyValueStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<PersistenceError> for SessionError {
    fn from(err: PersistenceError) -> Self {
        SessionError::StoreFailed {
            reason: err.to_string(),
        }
    }
}

pub fn load(path: &Path) -> Result<BTreeMap<String, String>, PersistenceError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

pub async fn save(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), PersistenceError> {
    let contents = serde_json::to_string_pretty(entries)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

/// JSON object on disk, read once and rewritten on every change. Writes are
/// serialised by the entries lock so the file never lags the map.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let entries = load(&path)?;
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().await;
        if entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        save(&self.path, &next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        save(&self.path, &next).await?;
        *entries = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_core::session::{SessionContext, VEHICLE_KEY};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = FileKeyValueStore::open(&path).unwrap();
        store.set(VEHICLE_KEY, "AB1234").await.unwrap();
        store.set("nombre_usuario", "Ana").await.unwrap();
        drop(store);

        let reopened = FileKeyValueStore::open(&path).unwrap();
        assert_eq!(reopened.get(VEHICLE_KEY).await.unwrap().as_deref(), Some("AB1234"));

        reopened.remove(VEHICLE_KEY).await.unwrap();
        let again = FileKeyValueStore::open(&path).unwrap();
        assert_eq!(again.get(VEHICLE_KEY).await.unwrap(), None);
        assert_eq!(again.get("nombre_usuario").await.unwrap().as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn test_session_restore_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{ "patente_sesion": " xy9999 " }"#).unwrap();

        let session = SessionContext::new(Arc::new(FileKeyValueStore::open(&path).unwrap()));
        let vehicle = session.restore().await.unwrap().unwrap();
        assert_eq!(vehicle.as_str(), "XY9999");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writes_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = Arc::new(FileKeyValueStore::open(&path).unwrap());

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.set(&format!("key_{i}"), "value").await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let on_disk = load(&path).unwrap();
        assert_eq!(on_disk.len(), 8);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let store = FileKeyValueStore::open(blocker.join("session.json")).unwrap();

        assert!(matches!(
            store.set(VEHICLE_KEY, "AB1234").await,
            Err(SessionError::StoreFailed { .. })
        ));
        assert_eq!(store.get(VEHICLE_KEY).await.unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileKeyValueStore::open(&path),
            Err(PersistenceError::Serde(_))
        ));
    }
}

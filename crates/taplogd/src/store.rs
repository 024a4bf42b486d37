//! Snapshot persistence collaborator.
//!
//! The orchestrator calls `store` exactly once per completed run. A store
//! fault is the only per-run failure surfaced to the caller.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

use taplog_common::{SessionSnapshot, TaplogError};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn store(&self, snapshot: &SessionSnapshot) -> Result<(), TaplogError>;
}

/// One pretty-printed JSON file per snapshot.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn store(&self, snapshot: &SessionSnapshot) -> Result<(), TaplogError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| TaplogError::Store(e.to_string()))?;

        let path = self.dir.join(format!("snapshot-{}.json", snapshot.id));
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| TaplogError::Store(e.to_string()))?;

        info!("snapshot stored: {}", path.display());
        Ok(())
    }
}

/// In-memory store for tests, with an optional scripted fault.
#[derive(Default)]
pub struct MemoryStore {
    pub stored: Mutex<Vec<SessionSnapshot>>,
    pub fail_with: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            stored: Mutex::new(Vec::new()),
            fail_with: Some(reason.to_string()),
        }
    }

    pub fn count(&self) -> usize {
        self.stored.lock().unwrap().len()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn store(&self, snapshot: &SessionSnapshot) -> Result<(), TaplogError> {
        if let Some(reason) = &self.fail_with {
            return Err(TaplogError::Store(reason.clone()));
        }
        self.stored.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use taplog_common::TriggerInfo;
    use uuid::Uuid;

    fn empty_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            location: None,
            network: None,
            motion: None,
            magnetic: None,
            pressure: None,
            ambient_light: None,
            proximity: None,
            steps: None,
            thermal: None,
            battery: None,
            system: None,
            audio: None,
            trigger: TriggerInfo::from_params(&HashMap::new()),
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn json_store_writes_one_file_per_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let snapshot = empty_snapshot();

        store.store(&snapshot).await.unwrap();

        let path = dir.path().join(format!("snapshot-{}.json", snapshot.id));
        let content = std::fs::read_to_string(path).unwrap();
        let restored: SessionSnapshot = serde_json::from_str(&content).unwrap();
        assert_eq!(restored.id, snapshot.id);
    }

    #[tokio::test]
    async fn memory_store_fault_maps_to_store_error() {
        let store = MemoryStore::failing("disk full");
        let err = store.store(&empty_snapshot()).await.unwrap_err();
        assert!(matches!(err, TaplogError::Store(reason) if reason == "disk full"));
    }
}

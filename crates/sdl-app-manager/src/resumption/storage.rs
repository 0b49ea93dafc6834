//! `ResumptionStorage` (§4.5, §6): the abstract store for serialized
//! app records, plus a JSON-file-backed implementation. Spec §6 also
//! names an embedded relational backend selected by a
//! `use_db_for_resumption` flag; only the JSON backend is implemented
//! here (recorded as an open question in the workspace's design notes)
//! since both are meant to be interchangeable behind this trait.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::persisted::{PersistedAppRecord, ResumptionDocument, ResumptionMeta};

/// Storage contract for persisted per-app records and module-wide meta
/// (spec §6). Keyed externally by `"{device_mac}:{policy_app_id}"`.
#[async_trait]
pub trait ResumptionStorage: Send + Sync {
    async fn save_application(&self, key: &str, record: PersistedAppRecord) -> Result<(), CoreError>;
    async fn load_application(&self, key: &str) -> Result<Option<PersistedAppRecord>, CoreError>;
    async fn remove_application(&self, key: &str) -> Result<(), CoreError>;

    async fn meta(&self) -> Result<ResumptionMeta, CoreError>;
    async fn set_meta(&self, meta: ResumptionMeta) -> Result<(), CoreError>;

    /// Increments `ign_off_count` and `suspend_count` on every stored
    /// record and stamps `meta.last_ign_off_time` (spec §4.5).
    async fn on_suspend(&self, now_unix: i64) -> Result<(), CoreError>;
}

/// JSON-dictionary-backed `ResumptionStorage` (the default backend
/// named in spec §6). Holds the whole document in memory under one
/// lock and rewrites the file in full on every mutating call; `Arc`
/// around the atomic counters is unnecessary since the document lock
/// already serializes writers.
pub struct JsonFileResumptionStorage {
    path: PathBuf,
    doc: RwLock<ResumptionDocument>,
    saves: AtomicU32,
}

impl JsonFileResumptionStorage {
    /// Loads `path` if it exists, otherwise starts from an empty
    /// document. Does not create the file until the first save.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ResumptionDocument::default(),
            Err(e) => return Err(CoreError::from(e)),
        };
        Ok(Self {
            path,
            doc: RwLock::new(doc),
            saves: AtomicU32::new(0),
        })
    }

    async fn persist(&self, doc: &ResumptionDocument) -> Result<(), CoreError> {
        let json = serde_json::to_vec_pretty(doc)?;
        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[async_trait]
impl ResumptionStorage for JsonFileResumptionStorage {
    async fn save_application(&self, key: &str, record: PersistedAppRecord) -> Result<(), CoreError> {
        record
            .validate()
            .map_err(CoreError::ResumptionDataCorrupt)?;
        let mut doc = self.doc.write().await;
        doc.apps.insert(key.to_owned(), record);
        self.persist(&doc).await?;
        debug!(key, "resumption record saved");
        Ok(())
    }

    async fn load_application(&self, key: &str) -> Result<Option<PersistedAppRecord>, CoreError> {
        let doc = self.doc.read().await;
        Ok(doc.apps.get(key).cloned())
    }

    async fn remove_application(&self, key: &str) -> Result<(), CoreError> {
        let mut doc = self.doc.write().await;
        if doc.apps.remove(key).is_some() {
            self.persist(&doc).await?;
        }
        Ok(())
    }

    async fn meta(&self) -> Result<ResumptionMeta, CoreError> {
        Ok(self.doc.read().await.meta.clone())
    }

    async fn set_meta(&self, meta: ResumptionMeta) -> Result<(), CoreError> {
        let mut doc = self.doc.write().await;
        doc.meta = meta;
        self.persist(&doc).await
    }

    async fn on_suspend(&self, now_unix: i64) -> Result<(), CoreError> {
        let mut doc = self.doc.write().await;
        for record in doc.apps.values_mut() {
            record.ign_off_count = record.ign_off_count.saturating_add(1);
            record.suspend_count = record.suspend_count.saturating_add(1);
        }
        doc.meta.last_ign_off_time = Some(now_unix);
        self.persist(&doc).await?;
        warn!(apps = doc.apps.len(), "suspend: ign/suspend counters incremented");
        Ok(())
    }
}

/// In-memory `ResumptionStorage` with no disk I/O, for harnesses and
/// tests that don't need persistence across runs.
#[derive(Default)]
pub struct InMemoryResumptionStorage {
    doc: RwLock<ResumptionDocument>,
}

impl InMemoryResumptionStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResumptionStorage for InMemoryResumptionStorage {
    async fn save_application(&self, key: &str, record: PersistedAppRecord) -> Result<(), CoreError> {
        record.validate().map_err(CoreError::ResumptionDataCorrupt)?;
        self.doc.write().await.apps.insert(key.to_owned(), record);
        Ok(())
    }

    async fn load_application(&self, key: &str) -> Result<Option<PersistedAppRecord>, CoreError> {
        Ok(self.doc.read().await.apps.get(key).cloned())
    }

    async fn remove_application(&self, key: &str) -> Result<(), CoreError> {
        self.doc.write().await.apps.remove(key);
        Ok(())
    }

    async fn meta(&self) -> Result<ResumptionMeta, CoreError> {
        Ok(self.doc.read().await.meta.clone())
    }

    async fn set_meta(&self, meta: ResumptionMeta) -> Result<(), CoreError> {
        self.doc.write().await.meta = meta;
        Ok(())
    }

    async fn on_suspend(&self, now_unix: i64) -> Result<(), CoreError> {
        let mut doc = self.doc.write().await;
        for record in doc.apps.values_mut() {
            record.ign_off_count = record.ign_off_count.saturating_add(1);
            record.suspend_count = record.suspend_count.saturating_add(1);
        }
        doc.meta.last_ign_off_time = Some(now_unix);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::hmi_state::HmiLevel;
    use crate::model::persisted::{GlobalProperties, Subscriptions};

    fn sample_record() -> PersistedAppRecord {
        PersistedAppRecord {
            hmi_app_id: 7,
            hmi_level: HmiLevel::Full,
            is_media: true,
            grammar_id: None,
            hash: "abc123".into(),
            ign_off_count: 0,
            suspend_count: 0,
            time_stamp: 1000,
            commands: vec![],
            submenus: vec![],
            choice_sets: vec![],
            global_properties: GlobalProperties::default(),
            subscriptions: Subscriptions::default(),
            files: vec![],
        }
    }

    #[tokio::test]
    async fn json_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resumption.json");

        {
            let storage = JsonFileResumptionStorage::open(&path).await.unwrap();
            storage.save_application("mac:app1", sample_record()).await.unwrap();
        }

        let reopened = JsonFileResumptionStorage::open(&path).await.unwrap();
        let loaded = reopened.load_application("mac:app1").await.unwrap().unwrap();
        assert_eq!(loaded.hash, "abc123");
        assert_eq!(loaded.hmi_app_id, 7);
    }

    #[tokio::test]
    async fn remove_application_clears_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resumption.json");
        let storage = JsonFileResumptionStorage::open(&path).await.unwrap();

        storage.save_application("mac:app1", sample_record()).await.unwrap();
        storage.remove_application("mac:app1").await.unwrap();
        assert!(storage.load_application("mac:app1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn on_suspend_increments_counters_for_every_record() {
        let storage = InMemoryResumptionStorage::new();
        storage.save_application("mac:app1", sample_record()).await.unwrap();
        storage.on_suspend(5000).await.unwrap();

        let loaded = storage.load_application("mac:app1").await.unwrap().unwrap();
        assert_eq!(loaded.ign_off_count, 1);
        assert_eq!(loaded.suspend_count, 1);
        assert_eq!(storage.meta().await.unwrap().last_ign_off_time, Some(5000));
    }

    #[tokio::test]
    async fn saving_a_record_with_zero_hmi_app_id_is_rejected() {
        let storage = InMemoryResumptionStorage::new();
        let mut record = sample_record();
        record.hmi_app_id = 0;
        let result = storage.save_application("mac:app1", record).await;
        assert!(matches!(result, Err(CoreError::ResumptionDataCorrupt(_))));
    }
}

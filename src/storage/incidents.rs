use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analytics::IncidentEvent;

use super::{IncidentStore, StoreError};

const SNAPSHOT_QUALITY: u8 = 85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub confidence: f32,
    pub detection_type: String,
    pub object_count: usize,
}

/// One `<id>.jpg` snapshot and one `<id>.json` record per incident, indexed in
/// memory in timestamp order.
#[derive(Clone)]
pub struct FileIncidentStore {
    dir: PathBuf,
    index: Arc<RwLock<Vec<IncidentRecord>>>,
}

impl FileIncidentStore {
    /// Opens (creating if needed) `dir` and rebuilds the index from its records.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut records = Vec::new();
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable incident record")
                }
            }
        }
        records.sort_by_key(|r| r.timestamp);

        tracing::info!(dir = %dir.display(), incidents = records.len(), "incident store opened");

        Ok(Self {
            dir,
            index: Arc::new(RwLock::new(records)),
        })
    }

    /// Newest first.
    pub fn list(&self, limit: usize) -> Vec<IncidentRecord> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<IncidentRecord> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.iter().find(|r| r.id == id).cloned()
    }

    pub fn image(&self, id: Uuid) -> Result<Vec<u8>, StoreError> {
        if self.get(id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        Ok(std::fs::read(self.image_path(id))?)
    }

    pub fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        {
            let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
            let Some(pos) = index.iter().position(|r| r.id == id) else {
                return Err(StoreError::NotFound(id));
            };
            index.remove(pos);
        }
        self.remove_files(id);
        tracing::info!(incident = %id, "incident deleted");
        Ok(())
    }

    /// Removes every incident older than `days` days and returns how many went.
    pub fn cleanup_older_than(&self, days: u32) -> usize {
        // A cutoff before the representable calendar matches nothing.
        let Some(cutoff) = Duration::try_days(i64::from(days))
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            tracing::debug!(days, "cleanup cutoff out of range, nothing to remove");
            return 0;
        };
        let expired: Vec<Uuid> = {
            let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
            let split = index.partition_point(|r| r.timestamp < cutoff);
            index.drain(..split).map(|r| r.id).collect()
        };

        for id in &expired {
            self.remove_files(*id);
        }
        if !expired.is_empty() {
            tracing::info!(deleted = expired.len(), days, "old incidents cleaned up");
        }
        expired.len()
    }

    fn image_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.jpg"))
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn remove_files(&self, id: Uuid) {
        for path in [self.image_path(id), self.record_path(id)] {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove incident file");
                }
            }
        }
    }

    fn insert(&self, record: IncidentRecord) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let pos = index.partition_point(|r| r.timestamp <= record.timestamp);
        index.insert(pos, record);
    }
}

impl IncidentStore for FileIncidentStore {
    fn persist(&self, event: &IncidentEvent) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let image_path = self.image_path(id);

        let jpeg = event.snapshot.encode_jpeg(SNAPSHOT_QUALITY)?;
        std::fs::write(&image_path, jpeg)?;

        let record = IncidentRecord {
            id,
            timestamp: event.timestamp,
            image_path: image_path.display().to_string(),
            confidence: event.confidence,
            detection_type: event.detection_type.to_string(),
            object_count: event.object_count,
        };
        if let Err(e) = std::fs::write(self.record_path(id), serde_json::to_vec_pretty(&record)?) {
            let _ = std::fs::remove_file(&image_path);
            return Err(e.into());
        }

        tracing::info!(
            incident = %id,
            detection_type = %record.detection_type,
            objects = record.object_count,
            "incident stored"
        );
        self.insert(record);
        Ok(id)
    }

    fn count(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn read_record(path: &Path) -> Result<IncidentRecord, StoreError> {
    let content = std::fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

//! Record storage.
//!
//! Jobs and extraction records live behind the `Store` trait so the pipeline
//! never touches a concrete map. Implementations only need per-key atomic
//! insert/update; nothing coordinates across keys.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::extraction::{CorrectionRequest, ExtractedData, ExtractionRecord, PATCHABLE_KEYS};
use crate::domain::ProcessingJob;

/// A record that can be kept in a `Store`.
pub trait Stored: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> Uuid;

    /// Age reference for sweeping
    fn touched_at(&self) -> DateTime<Utc>;
}

impl Stored for ProcessingJob {
    fn id(&self) -> Uuid {
        self.id
    }

    fn touched_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Stored for ExtractionRecord {
    fn id(&self) -> Uuid {
        self.id
    }

    fn touched_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[async_trait]
pub trait Store<T: Stored>: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<T>>;

    async fn put(&self, item: T) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Remove records last touched before `older_than`; returns how many went.
    async fn sweep(&self, older_than: DateTime<Utc>) -> Result<usize>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

pub struct MemoryStore<T> {
    items: RwLock<HashMap<Uuid, T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Stored> Store<T> for MemoryStore<T> {
    async fn get(&self, id: Uuid) -> Result<Option<T>> {
        Ok(self.items.read().get(&id).cloned())
    }

    async fn put(&self, item: T) -> Result<()> {
        self.items.write().insert(item.id(), item);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.items.write().remove(&id).is_some())
    }

    async fn sweep(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, item| item.touched_at() >= older_than);
        Ok(before - items.len())
    }
}

// ============================================================================
// Flat files
// ============================================================================

/// One pretty-printed JSON file per record id.
pub struct FileStore<T> {
    dir: PathBuf,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> FileStore<T> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl<T: Stored> Store<T> for FileStore<T> {
    async fn get(&self, id: Uuid) -> Result<Option<T>> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let item = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt record file {}", path.display()))?;
                Ok(Some(item))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn put(&self, item: T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(item.id());
        let data = serde_json::to_vec_pretty(&item).context("Failed to serialize record")?;

        // Write-then-rename so readers never see a half-written file; the
        // temp name is unique per write so concurrent writers never share it
        let tmp = path.with_extension(format!("{}.json.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move record into {}", path.display()))?;

        debug!(path = %path.display(), "Record persisted");
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("Failed to delete record file"),
        }
    }

    async fn sweep(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("Failed to list record directory"),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            match serde_json::from_slice::<T>(&bytes) {
                Ok(item) if item.touched_at() < older_than => {
                    tokio::fs::remove_file(&path).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
            }
        }
        Ok(removed)
    }
}

// ============================================================================
// Extraction repository
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("extraction {0} not found")]
    NotFound(Uuid),

    #[error("invalid correction: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

type RecordLocks = Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>;

/// Memory tier in front of the flat-file tier.
#[derive(Clone)]
pub struct ExtractionRepository {
    memory: Arc<dyn Store<ExtractionRecord>>,
    files: Arc<FileStore<ExtractionRecord>>,
    /// Serializes read-merge-save per extraction id
    locks: Arc<RecordLocks>,
}

impl ExtractionRepository {
    pub fn new(memory: Arc<dyn Store<ExtractionRecord>>, dir: impl Into<PathBuf>) -> Self {
        Self {
            memory,
            files: Arc::new(FileStore::new(dir)),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        self.files.dir()
    }

    /// Writes through to disk; the file is the durable copy.
    pub async fn save(&self, record: ExtractionRecord) -> Result<()> {
        self.files.put(record.clone()).await?;
        self.memory.put(record).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ExtractionRecord>> {
        if let Some(record) = self.memory.get(id).await? {
            return Ok(Some(record));
        }

        let record = self.files.get(id).await?;
        if let Some(record) = &record {
            debug!(extraction_id = %id, "Extraction loaded from disk");
            self.memory.put(record.clone()).await?;
        }
        Ok(record)
    }

    /// Evicts stale records from memory only; files are kept.
    pub async fn sweep_memory(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.memory.sweep(older_than).await
    }

    /// Merge a reviewer's patch into the record, mark it verified and persist.
    /// Corrections to the same record are applied one at a time.
    pub async fn apply_correction(
        &self,
        id: Uuid,
        correction: CorrectionRequest,
    ) -> Result<ExtractionRecord, CorrectionError> {
        let lock = self.locks.lock().entry(id).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.merge_and_save(id, correction).await
        };
        drop(lock);

        // Forget the lock once no other correction holds or waits on it
        let mut locks = self.locks.lock();
        if locks.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&id);
        }

        result
    }

    async fn merge_and_save(
        &self,
        id: Uuid,
        correction: CorrectionRequest,
    ) -> Result<ExtractionRecord, CorrectionError> {
        let mut record = self.get(id).await?.ok_or(CorrectionError::NotFound(id))?;

        if correction.fields.is_empty() {
            return Err(CorrectionError::Invalid("no fields supplied".to_string()));
        }

        record.data = merge_patch(&record.data, &correction.fields)?;

        for key in correction.fields.keys() {
            if !record.corrections.contains(key) {
                record.corrections.push(key.clone());
            }
        }

        let now = Utc::now();
        record.verified = true;
        record.verified_at = Some(now);
        record.updated_at = now;

        self.save(record.clone()).await?;

        info!(
            extraction_id = %id,
            fields = ?correction.fields.keys().collect::<Vec<_>>(),
            "Extraction corrected"
        );

        Ok(record)
    }
}

/// Object sections merge field by field; arrays and scalars are replaced.
fn merge_patch(
    data: &ExtractedData,
    patch: &serde_json::Map<String, serde_json::Value>,
) -> Result<ExtractedData, CorrectionError> {
    let mut current = serde_json::to_value(data).map_err(anyhow::Error::from)?;
    let target = current
        .as_object_mut()
        .ok_or_else(|| CorrectionError::Invalid("extracted data is not an object".to_string()))?;

    for (key, value) in patch {
        if !PATCHABLE_KEYS.contains(&key.as_str()) {
            return Err(CorrectionError::Invalid(format!("unknown field '{}'", key)));
        }

        match (target.get_mut(key), value) {
            (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(update)) => {
                for (field, v) in update {
                    existing.insert(field.clone(), v.clone());
                }
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    serde_json::from_value(current).map_err(|e| CorrectionError::Invalid(e.to_string()))
}

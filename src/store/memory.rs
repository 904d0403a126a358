//! In-memory repository implementations.
//!
//! Back the test suite and single-process deployments. All of them are
//! plain maps behind `parking_lot` locks; none of them persist anything.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::media::{ContentError, MediaKind};
use crate::scan::{ScanKind, ScanSchedule, SchedulePatch, ScheduleStore};

use super::{
    AnalysisRecord, AnalysisStatus, AnalysisStore, CatalogEntry, FaceOccurrence, FaceStore,
    FileCatalog, MarkerStore, RecordPatch, SearchDocument, SearchIndex, StoreError, VideoMarker,
};

/// In-memory analysis record store.
#[derive(Debug, Default)]
pub struct MemoryAnalysisStore {
    records: RwLock<HashMap<String, AnalysisRecord>>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held; one per file id.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn get(&self, file_id: &str) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.records.read().get(file_id).cloned())
    }

    async fn upsert_pending(
        &self,
        file_id: &str,
        kind: MediaKind,
    ) -> Result<AnalysisRecord, StoreError> {
        let mut records = self.records.write();
        let record = records
            .entry(file_id.to_string())
            .and_modify(|existing| {
                existing.kind = kind;
                existing.status = AnalysisStatus::Pending;
                existing.error = None;
                existing.updated_at = chrono::Utc::now();
            })
            .or_insert_with(|| AnalysisRecord::pending(file_id, kind));
        Ok(record.clone())
    }

    async fn update(&self, file_id: &str, patch: RecordPatch) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(file_id)
            .ok_or_else(|| StoreError::NotFound(format!("analysis record {file_id}")))?;
        patch.apply(record);
        Ok(())
    }
}

/// In-memory append-only marker store.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    markers: RwLock<Vec<VideoMarker>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<VideoMarker> {
        self.markers.read().clone()
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn append(&self, marker: VideoMarker) -> Result<(), StoreError> {
        self.markers.write().push(marker);
        Ok(())
    }

    async fn list(&self, file_id: &str) -> Result<Vec<VideoMarker>, StoreError> {
        Ok(self
            .markers
            .read()
            .iter()
            .filter(|m| m.file_id == file_id)
            .cloned()
            .collect())
    }
}

/// In-memory append-only face occurrence store.
#[derive(Debug, Default)]
pub struct MemoryFaceStore {
    faces: RwLock<Vec<FaceOccurrence>>,
}

impl MemoryFaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<FaceOccurrence> {
        self.faces.read().clone()
    }
}

#[async_trait]
impl FaceStore for MemoryFaceStore {
    async fn append(&self, face: FaceOccurrence) -> Result<(), StoreError> {
        self.faces.write().push(face);
        Ok(())
    }

    async fn list(&self, file_id: &str) -> Result<Vec<FaceOccurrence>, StoreError> {
        Ok(self
            .faces
            .read()
            .iter()
            .filter(|f| f.file_id == file_id)
            .cloned()
            .collect())
    }
}

/// In-memory file catalog: entries plus their bytes.
#[derive(Debug, Default)]
pub struct MemoryFileCatalog {
    entries: RwLock<Vec<CatalogEntry>>,
    bytes: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryFileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: CatalogEntry, bytes: Vec<u8>) {
        self.bytes
            .write()
            .insert(entry.file_id.clone(), Arc::new(bytes));
        self.entries.write().push(entry);
    }

    /// Register an entry whose bytes are unavailable; fetching it fails.
    pub fn insert_entry_only(&self, entry: CatalogEntry) {
        self.entries.write().push(entry);
    }
}

#[async_trait]
impl FileCatalog for MemoryFileCatalog {
    async fn list(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.entries.read().clone())
    }

    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, ContentError> {
        self.bytes
            .read()
            .get(file_id)
            .map(|b| b.as_ref().clone())
            .ok_or_else(|| ContentError::Unavailable(format!("no bytes for {file_id}")))
    }
}

/// In-memory schedule store, seeded with one row per scan category.
#[derive(Debug)]
pub struct MemoryScheduleStore {
    schedules: RwLock<HashMap<ScanKind, ScanSchedule>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        let schedules = ScanKind::ALL
            .into_iter()
            .map(|kind| (kind, ScanSchedule::manual(kind)))
            .collect();
        Self {
            schedules: RwLock::new(schedules),
        }
    }

    /// A store with no rows; only useful to exercise missing-schedule
    /// handling.
    pub fn unseeded() -> Self {
        Self {
            schedules: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn get(&self, kind: ScanKind) -> Result<Option<ScanSchedule>, StoreError> {
        Ok(self.schedules.read().get(&kind).cloned())
    }

    async fn list(&self) -> Result<Vec<ScanSchedule>, StoreError> {
        Ok(self.schedules.read().values().cloned().collect())
    }

    async fn update(&self, kind: ScanKind, patch: SchedulePatch) -> Result<(), StoreError> {
        let mut schedules = self.schedules.write();
        let schedule = schedules
            .get_mut(&kind)
            .ok_or_else(|| StoreError::NotFound(format!("scan schedule {kind}")))?;
        patch.apply(schedule);
        Ok(())
    }
}

/// Search index that records every document it receives.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    documents: RwLock<HashMap<String, SearchDocument>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, file_id: &str) -> Option<SearchDocument> {
        self.documents.read().get(file_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn update(&self, file_id: &str, doc: SearchDocument) -> Result<(), StoreError> {
        self.documents.write().insert(file_id.to_string(), doc);
        Ok(())
    }
}

/// Search index that drops every update; for deployments without one.
#[derive(Debug, Default)]
pub struct NullSearchIndex;

#[async_trait]
impl SearchIndex for NullSearchIndex {
    async fn update(&self, file_id: &str, _doc: SearchDocument) -> Result<(), StoreError> {
        tracing::debug!(file_id, "search index disabled, dropping update");
        Ok(())
    }
}

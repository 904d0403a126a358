//! Persistence contracts.
//!
//! The orchestration core only needs narrow repository operations:
//! get-by-key, create/reset, and partial update for analysis records;
//! append-only creation for markers and face occurrences; corpus
//! enumeration for scans; and a best-effort search-index update. Schema and
//! SQL mechanics belong to the embedding application; this module defines
//! the traits plus the entities they persist, and [`memory`] provides
//! in-memory implementations used by tests and small deployments.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::{ContentError, MediaKind};
use crate::providers::{FaceBounds, GeoPoint, TaggingOutcome, Transcript, VisionOutcome};

/// Repository operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Lifecycle of one file's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }
}

/// One file's analysis state and merged result. Exactly one record exists
/// per file id; re-submission resets it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub file_id: String,
    pub kind: MediaKind,
    pub status: AnalysisStatus,
    /// Raw per-provider payloads, absent when the capability was disabled
    /// or unavailable for this item.
    pub tagging: Option<TaggingOutcome>,
    pub vision: Option<VisionOutcome>,
    pub transcription: Option<Transcript>,
    pub location: Option<GeoPoint>,
    /// Merged tag names, deduplicated.
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub confidence: f32,
    pub thumbnail: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
    pub fn pending(file_id: &str, kind: MediaKind) -> Self {
        let now = Utc::now();
        Self {
            file_id: file_id.to_string(),
            kind,
            status: AnalysisStatus::Pending,
            tagging: None,
            vision: None,
            transcription: None,
            location: None,
            tags: Vec::new(),
            description: None,
            confidence: 0.0,
            thumbnail: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Partial update for an [`AnalysisRecord`]: `Some` fields are written,
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub status: Option<AnalysisStatus>,
    pub tagging: Option<TaggingOutcome>,
    pub vision: Option<VisionOutcome>,
    pub transcription: Option<Transcript>,
    pub location: Option<GeoPoint>,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
    pub confidence: Option<f32>,
    pub thumbnail: Option<String>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    pub fn status(status: AnalysisStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply this patch to a record in place, bumping `updated_at`.
    pub fn apply(self, record: &mut AnalysisRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(tagging) = self.tagging {
            record.tagging = Some(tagging);
        }
        if let Some(vision) = self.vision {
            record.vision = Some(vision);
        }
        if let Some(transcription) = self.transcription {
            record.transcription = Some(transcription);
        }
        if let Some(location) = self.location {
            record.location = Some(location);
        }
        if let Some(tags) = self.tags {
            record.tags = tags;
        }
        if let Some(description) = self.description {
            record.description = Some(description);
        }
        if let Some(confidence) = self.confidence {
            record.confidence = confidence;
        }
        if let Some(thumbnail) = self.thumbnail {
            record.thumbnail = Some(thumbnail);
        }
        if let Some(error) = self.error {
            record.error = Some(error);
        }
        if let Some(completed_at) = self.completed_at {
            record.completed_at = Some(completed_at);
        }
        record.updated_at = Utc::now();
    }
}

/// Kind of a video timeline marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Scene,
    Face,
    Keyword,
    Silence,
}

/// Timestamped annotation on a video's timeline. Many per file;
/// append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMarker {
    pub file_id: String,
    pub kind: MarkerKind,
    pub timestamp_secs: f64,
    pub label: String,
    pub confidence: Option<f32>,
}

/// One detected face attached to a file. `timestamp_secs` is set for video
/// frames, absent for stills. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceOccurrence {
    pub file_id: String,
    pub confidence: f32,
    pub bounds: Option<FaceBounds>,
    pub timestamp_secs: Option<f64>,
}

/// One file in the corpus as seen by the scan scheduler. The flags reflect
/// what analysis artifacts the storage layer already holds.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub file_id: String,
    pub content_type: String,
    pub has_faces: bool,
    pub has_tags: bool,
    pub has_location: bool,
    pub analysis_completed: bool,
}

/// Fields pushed to the search index after a completed analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchDocument {
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub transcription: Option<String>,
    pub ocr_text: Option<String>,
    pub faces: usize,
}

/// Analysis record repository.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn get(&self, file_id: &str) -> Result<Option<AnalysisRecord>, StoreError>;

    /// Create the record for a file id, or reset an existing one to pending
    /// (clearing the prior error). Never creates a duplicate.
    async fn upsert_pending(
        &self,
        file_id: &str,
        kind: MediaKind,
    ) -> Result<AnalysisRecord, StoreError>;

    /// Partially update the record for a file id.
    async fn update(&self, file_id: &str, patch: RecordPatch) -> Result<(), StoreError>;
}

/// Append-only marker repository.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn append(&self, marker: VideoMarker) -> Result<(), StoreError>;
    async fn list(&self, file_id: &str) -> Result<Vec<VideoMarker>, StoreError>;
}

/// Append-only face occurrence repository.
#[async_trait]
pub trait FaceStore: Send + Sync {
    async fn append(&self, face: FaceOccurrence) -> Result<(), StoreError>;
    async fn list(&self, file_id: &str) -> Result<Vec<FaceOccurrence>, StoreError>;
}

/// Read access to the file corpus, owned by the storage layer.
#[async_trait]
pub trait FileCatalog: Send + Sync {
    async fn list(&self) -> Result<Vec<CatalogEntry>, StoreError>;
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, ContentError>;
}

/// Best-effort search index notification.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn update(&self, file_id: &str, doc: SearchDocument) -> Result<(), StoreError>;
}

//! Capability provider contracts.
//!
//! Each analysis capability (semantic tagging, structural vision/face
//! detection, speech transcription, geolocation extraction) is an external
//! service behind a trait: `enabled()` plus one capability call taking
//! bytes or a scratch path and a file id. A provider error means
//! "unavailable for this item" and is never fatal to a pipeline; the
//! orchestrator guards every call individually.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by capability providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("provider call failed: {0}")]
    Failed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One named tag with a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub confidence: f32,
}

/// Result of a semantic tagging call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaggingOutcome {
    pub tags: Vec<Tag>,
    pub description: Option<String>,
}

/// One object reported by the structural vision provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: String,
    pub confidence: f32,
}

/// Normalized bounding box of a detected face (fractions of the frame).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaceBounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One face reported by the structural vision provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub confidence: f32,
    pub bounds: Option<FaceBounds>,
}

/// Result of a structural vision call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisionOutcome {
    pub caption: Option<String>,
    pub objects: Vec<DetectedObject>,
    pub faces: Vec<DetectedFace>,
    pub ocr_text: Option<String>,
}

/// One timed segment of a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

/// Result of a transcription call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: Option<String>,
}

/// A geographic point extracted from media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub place: Option<String>,
}

/// Semantic tagging capability.
#[async_trait]
pub trait TaggingProvider: Send + Sync {
    fn enabled(&self) -> bool;
    async fn tag_image(&self, bytes: &[u8], file_id: &str) -> Result<TaggingOutcome, ProviderError>;
}

/// Structural vision capability: caption, objects, faces, OCR text.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn enabled(&self) -> bool;
    async fn analyze_image(&self, bytes: &[u8], file_id: &str)
        -> Result<VisionOutcome, ProviderError>;
}

/// Speech transcription capability; takes a scratch-file path.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    fn enabled(&self) -> bool;
    async fn transcribe(&self, path: &Path, file_id: &str) -> Result<Transcript, ProviderError>;
}

/// Geolocation extraction capability.
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    fn enabled(&self) -> bool;
    async fn extract(&self, bytes: &[u8], file_id: &str)
        -> Result<Option<GeoPoint>, ProviderError>;
}

/// The full provider set consumed by one orchestrator.
#[derive(Clone)]
pub struct Providers {
    pub tagging: Arc<dyn TaggingProvider>,
    pub vision: Arc<dyn VisionProvider>,
    pub transcription: Arc<dyn TranscriptionProvider>,
    pub geolocation: Arc<dyn GeolocationProvider>,
}

impl Providers {
    /// A provider set with every capability disabled.
    pub fn disabled() -> Self {
        Self {
            tagging: Arc::new(DisabledProvider),
            vision: Arc::new(DisabledProvider),
            transcription: Arc::new(DisabledProvider),
            geolocation: Arc::new(DisabledProvider),
        }
    }
}

/// Stand-in provider for capabilities that are switched off.
pub struct DisabledProvider;

#[async_trait]
impl TaggingProvider for DisabledProvider {
    fn enabled(&self) -> bool {
        false
    }
    async fn tag_image(&self, _: &[u8], _: &str) -> Result<TaggingOutcome, ProviderError> {
        Err(ProviderError::NotConfigured("tagging disabled".to_string()))
    }
}

#[async_trait]
impl VisionProvider for DisabledProvider {
    fn enabled(&self) -> bool {
        false
    }
    async fn analyze_image(&self, _: &[u8], _: &str) -> Result<VisionOutcome, ProviderError> {
        Err(ProviderError::NotConfigured("vision disabled".to_string()))
    }
}

#[async_trait]
impl TranscriptionProvider for DisabledProvider {
    fn enabled(&self) -> bool {
        false
    }
    async fn transcribe(&self, _: &Path, _: &str) -> Result<Transcript, ProviderError> {
        Err(ProviderError::NotConfigured(
            "transcription disabled".to_string(),
        ))
    }
}

#[async_trait]
impl GeolocationProvider for DisabledProvider {
    fn enabled(&self) -> bool {
        false
    }
    async fn extract(&self, _: &[u8], _: &str) -> Result<Option<GeoPoint>, ProviderError> {
        Err(ProviderError::NotConfigured(
            "geolocation disabled".to_string(),
        ))
    }
}

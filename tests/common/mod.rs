//! Shared mocks and harness for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use percept::analysis::{AnalysisDeps, AnalysisService};
use percept::config::PipelineSettings;
use percept::jobs::JobQueue;
use percept::media::toolkit::{MediaToolkit, SampledFrame, ToolkitError};
use percept::media::ContentFetcher;
use percept::providers::{
    GeoPoint, GeolocationProvider, ProviderError, Providers, TaggingOutcome, TaggingProvider,
    Transcript, TranscriptionProvider, VisionOutcome, VisionProvider,
};
use percept::store::memory::{
    MemoryAnalysisStore, MemoryFaceStore, MemoryMarkerStore, MemorySearchIndex,
};
use percept::store::{AnalysisStatus, AnalysisStore, SearchDocument, SearchIndex, StoreError};

pub struct TestHarness {
    pub service: AnalysisService,
    pub queue: Arc<JobQueue>,
    pub records: Arc<MemoryAnalysisStore>,
    pub markers: Arc<MemoryMarkerStore>,
    pub faces: Arc<MemoryFaceStore>,
    pub search: Arc<MemorySearchIndex>,
}

pub fn harness(
    providers: Providers,
    toolkit: Arc<dyn MediaToolkit>,
    settings: PipelineSettings,
) -> TestHarness {
    let queue = Arc::new(JobQueue::new(2));
    let records = Arc::new(MemoryAnalysisStore::new());
    let markers = Arc::new(MemoryMarkerStore::new());
    let faces = Arc::new(MemoryFaceStore::new());
    let search = Arc::new(MemorySearchIndex::new());
    let service = AnalysisService::new(
        AnalysisDeps {
            queue: queue.clone(),
            records: records.clone(),
            markers: markers.clone(),
            faces: faces.clone(),
            search: search.clone(),
            providers,
            toolkit,
        },
        settings,
    );
    TestHarness {
        service,
        queue,
        records,
        markers,
        faces,
        search,
    }
}

pub fn settings_in(tmp: &Path) -> PipelineSettings {
    PipelineSettings {
        scratch_dir: tmp.join("scratch"),
        thumbnail_dir: tmp.join("thumbs"),
        ..PipelineSettings::default()
    }
}

pub fn fetcher(bytes: Vec<u8>) -> ContentFetcher {
    Box::new(move || Box::pin(async move { Ok(bytes) }))
}

pub fn failing_fetcher(message: &str) -> ContentFetcher {
    let message = message.to_string();
    Box::new(move || {
        Box::pin(async move { Err(percept::media::ContentError::Unavailable(message)) })
    })
}

pub async fn wait_for_status(records: &MemoryAnalysisStore, file_id: &str, status: AnalysisStatus) {
    for _ in 0..500 {
        if let Some(record) = records.get(file_id).await.unwrap() {
            if record.status == status {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("record for {file_id} never reached {status:?}");
}

// ---------------------------------------------------------------------------
// Provider mocks
// ---------------------------------------------------------------------------

/// Tagging provider returning a fixed outcome; counts its calls.
pub struct StaticTagging {
    pub outcome: TaggingOutcome,
    pub calls: AtomicUsize,
}

impl StaticTagging {
    pub fn new(outcome: TaggingOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TaggingProvider for StaticTagging {
    fn enabled(&self) -> bool {
        true
    }
    async fn tag_image(&self, _: &[u8], _: &str) -> Result<TaggingOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Tagging provider that is enabled but always fails.
pub struct FailingTagging;

#[async_trait]
impl TaggingProvider for FailingTagging {
    fn enabled(&self) -> bool {
        true
    }
    async fn tag_image(&self, _: &[u8], _: &str) -> Result<TaggingOutcome, ProviderError> {
        Err(ProviderError::Failed("semantic model offline".to_string()))
    }
}

/// Vision provider returning a fixed outcome; counts its calls.
pub struct StaticVision {
    pub outcome: VisionOutcome,
    pub calls: AtomicUsize,
}

impl StaticVision {
    pub fn new(outcome: VisionOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VisionProvider for StaticVision {
    fn enabled(&self) -> bool {
        true
    }
    async fn analyze_image(&self, _: &[u8], _: &str) -> Result<VisionOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Transcription provider returning a fixed transcript.
pub struct StaticTranscription {
    pub transcript: Transcript,
}

#[async_trait]
impl TranscriptionProvider for StaticTranscription {
    fn enabled(&self) -> bool {
        true
    }
    async fn transcribe(&self, path: &Path, _: &str) -> Result<Transcript, ProviderError> {
        // The pipeline must hand over a path that actually exists.
        if !path.exists() {
            return Err(ProviderError::Failed(format!(
                "scratch file missing: {}",
                path.display()
            )));
        }
        Ok(self.transcript.clone())
    }
}

/// Geolocation provider returning a fixed point; counts its calls.
pub struct StaticGeolocation {
    pub point: Option<GeoPoint>,
    pub calls: AtomicUsize,
}

impl StaticGeolocation {
    pub fn new(point: Option<GeoPoint>) -> Self {
        Self {
            point,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GeolocationProvider for StaticGeolocation {
    fn enabled(&self) -> bool {
        true
    }
    async fn extract(&self, _: &[u8], _: &str) -> Result<Option<GeoPoint>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.point.clone())
    }
}

/// Search index whose updates always fail.
pub struct FailingSearchIndex;

#[async_trait]
impl SearchIndex for FailingSearchIndex {
    async fn update(&self, _: &str, _: SearchDocument) -> Result<(), StoreError> {
        Err(StoreError::Backend("index unreachable".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Toolkit mock
// ---------------------------------------------------------------------------

/// Toolkit producing deterministic artifacts without ffmpeg or real image
/// decoding. Writes `frame_count` sampled frames to disk so the pipeline's
/// frame reads succeed.
pub struct MockToolkit {
    pub frame_count: usize,
    pub duration_secs: f64,
}

impl MockToolkit {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            duration_secs: 120.0,
        }
    }
}

#[async_trait]
impl MediaToolkit for MockToolkit {
    async fn image_thumbnail(&self, _: &[u8], file_id: &str) -> Result<String, ToolkitError> {
        Ok(format!("thumb:{file_id}"))
    }

    async fn bounded_copy(&self, bytes: &[u8], _: u32) -> Result<Vec<u8>, ToolkitError> {
        Ok(bytes.to_vec())
    }

    async fn video_poster(&self, _: &Path, file_id: &str) -> Result<String, ToolkitError> {
        Ok(format!("poster:{file_id}"))
    }

    async fn probe_duration(&self, _: &Path) -> Result<f64, ToolkitError> {
        Ok(self.duration_secs)
    }

    async fn sample_frames(
        &self,
        _: &Path,
        interval_secs: f64,
        out_dir: &Path,
    ) -> Result<Vec<SampledFrame>, ToolkitError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let mut frames = Vec::with_capacity(self.frame_count);
        for i in 0..self.frame_count {
            let path: PathBuf = out_dir.join(format!("frame-{i:05}.jpg"));
            tokio::fs::write(&path, [i as u8]).await?;
            frames.push(SampledFrame {
                path,
                timestamp_secs: i as f64 * interval_secs,
            });
        }
        Ok(frames)
    }

    async fn extract_audio(&self, _: &Path, out_path: &Path) -> Result<(), ToolkitError> {
        tokio::fs::write(out_path, b"wav").await?;
        Ok(())
    }
}

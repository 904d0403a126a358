//! Per-kind analysis pipelines.
//!
//! Every capability step runs behind [`attempt`]: a failing provider or
//! toolkit call is logged and its contribution is simply absent from the
//! merged result. Only failures outside those guards (content fetch,
//! scratch I/O, persistence) are terminal for the job and the record.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::media::{sanitize_id, scratch_path, ContentError, ContentFetcher, MediaKind, ScratchSet};
use crate::providers::{GeoPoint, Tag, TaggingOutcome, Transcript, VisionOutcome};
use crate::store::{
    AnalysisStatus, FaceOccurrence, MarkerKind, RecordPatch, SearchDocument, StoreError,
    VideoMarker,
};

use super::ServiceInner;

/// Failures outside the per-capability guards; terminal for the record.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("content fetch failed: {0}")]
    Content(#[from] ContentError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fan-in of every capability's contribution for one file.
#[derive(Debug, Default)]
struct Merged {
    tagging: Option<TaggingOutcome>,
    vision: Option<VisionOutcome>,
    transcription: Option<Transcript>,
    location: Option<GeoPoint>,
    tags: Vec<String>,
    description: Option<String>,
    confidence: f32,
    thumbnail: Option<String>,
    duration_secs: f64,
    faces_recorded: usize,
}

impl Merged {
    fn search_document(&self) -> SearchDocument {
        SearchDocument {
            tags: self.tags.clone(),
            description: self.description.clone(),
            transcription: self.transcription.as_ref().map(|t| t.text.clone()),
            ocr_text: self.vision.as_ref().and_then(|v| v.ocr_text.clone()),
            faces: self.faces_recorded,
        }
    }

    fn into_patch(self) -> RecordPatch {
        RecordPatch {
            status: Some(AnalysisStatus::Completed),
            tagging: self.tagging,
            vision: self.vision,
            transcription: self.transcription,
            location: self.location,
            tags: Some(self.tags),
            description: self.description,
            confidence: Some(self.confidence),
            thumbnail: self.thumbnail,
            completed_at: Some(Utc::now()),
            ..RecordPatch::default()
        }
    }
}

/// Run the pipeline for one queued analysis job.
///
/// Returns the job's result summary, or the failure message recorded on
/// the job and the analysis record.
pub(crate) async fn execute(
    inner: Arc<ServiceInner>,
    file_id: String,
    kind: MediaKind,
    content: ContentFetcher,
) -> Result<serde_json::Value, String> {
    let _guard = inner.locks.acquire(&file_id).await;

    if let Err(e) = inner
        .records
        .update(&file_id, RecordPatch::status(AnalysisStatus::Processing))
        .await
    {
        return Err(format!("failed to mark record processing: {e}"));
    }

    let outcome = match kind {
        MediaKind::Image => run_image(&inner, &file_id, content).await,
        MediaKind::Audio => run_audio(&inner, &file_id, content).await,
        MediaKind::Video => run_video(&inner, &file_id, content).await,
    };

    match outcome {
        Ok(merged) => {
            let summary = serde_json::json!({
                "file_id": file_id,
                "kind": kind.as_str(),
                "tags": merged.tags.len(),
                "faces": merged.faces_recorded,
                "duration_secs": merged.duration_secs,
            });
            let doc = merged.search_document();
            if let Err(e) = inner.records.update(&file_id, merged.into_patch()).await {
                return Err(format!("failed to persist analysis result: {e}"));
            }

            // Best-effort search index notification; a failure here is
            // logged and never flips the record back.
            let search = Arc::clone(&inner.search);
            let indexed_id = file_id.clone();
            tokio::spawn(async move {
                if let Err(e) = search.update(&indexed_id, doc).await {
                    tracing::warn!(file_id = %indexed_id, error = %e, "search index update failed");
                }
            });

            tracing::info!(file_id = %file_id, kind = kind.as_str(), "analysis completed");
            Ok(summary)
        }
        Err(e) => {
            let message = e.to_string();
            let patch = RecordPatch {
                status: Some(AnalysisStatus::Failed),
                error: Some(message.clone()),
                completed_at: Some(Utc::now()),
                ..RecordPatch::default()
            };
            if let Err(persist) = inner.records.update(&file_id, patch).await {
                tracing::error!(file_id = %file_id, error = %persist, "failed to record analysis failure");
            }
            tracing::warn!(file_id = %file_id, kind = kind.as_str(), error = %message, "analysis failed");
            Err(message)
        }
    }
}

async fn run_image(
    inner: &ServiceInner,
    file_id: &str,
    content: ContentFetcher,
) -> Result<Merged, PipelineError> {
    let bytes = content().await?;
    let settings = &inner.settings;
    let mut merged = Merged::default();

    merged.thumbnail = attempt(
        "image thumbnail",
        file_id,
        inner.toolkit.image_thumbnail(&bytes, file_id),
    )
    .await;

    // Providers see a size-bounded copy; geolocation below still reads the
    // original bytes (EXIF survives no re-encode).
    let analysis_bytes = attempt(
        "bounded analysis copy",
        file_id,
        inner
            .toolkit
            .bounded_copy(&bytes, settings.max_analysis_dimension),
    )
    .await
    .unwrap_or_else(|| bytes.clone());

    if inner.providers.tagging.enabled() {
        merged.tagging = attempt(
            "semantic tagging",
            file_id,
            inner.providers.tagging.tag_image(&analysis_bytes, file_id),
        )
        .await;
    }

    if inner.providers.vision.enabled() {
        merged.vision = attempt(
            "structural vision",
            file_id,
            inner.providers.vision.analyze_image(&analysis_bytes, file_id),
        )
        .await;
    }

    merged.tags = merge_tag_names(merged.tagging.as_ref(), merged.vision.as_ref());
    merged.description = merged
        .tagging
        .as_ref()
        .and_then(|t| t.description.clone())
        .or_else(|| merged.vision.as_ref().and_then(|v| v.caption.clone()));
    merged.confidence = top_confidence(merged.tagging.as_ref(), merged.vision.as_ref());

    if inner.settings.face_detection {
        if let Some(vision) = &merged.vision {
            merged.faces_recorded = record_faces(
                inner,
                file_id,
                &vision.faces,
                FaceOccurrenceSource::Still,
            )
            .await?;
        }
    }

    if inner.providers.geolocation.enabled() {
        merged.location = attempt(
            "geolocation",
            file_id,
            inner.providers.geolocation.extract(&bytes, file_id),
        )
        .await
        .flatten();
    }

    Ok(merged)
}

async fn run_audio(
    inner: &ServiceInner,
    file_id: &str,
    content: ContentFetcher,
) -> Result<Merged, PipelineError> {
    let bytes = content().await?;
    let mut scratch = ScratchSet::new();
    let outcome = audio_steps(inner, file_id, &bytes, &mut scratch).await;
    // Scratch release happens on every exit path, success or failure.
    scratch.cleanup().await;
    outcome
}

async fn audio_steps(
    inner: &ServiceInner,
    file_id: &str,
    bytes: &[u8],
    scratch: &mut ScratchSet,
) -> Result<Merged, PipelineError> {
    let settings = &inner.settings;
    let path = scratch
        .materialize(&settings.scratch_dir, file_id, "audio", bytes)
        .await?;

    let mut merged = Merged::default();
    if inner.providers.transcription.enabled() {
        merged.transcription = attempt(
            "transcription",
            file_id,
            inner.providers.transcription.transcribe(&path, file_id),
        )
        .await;
    }
    if let Some(transcript) = &merged.transcription {
        merged.description = Some(prefix_chars(
            &transcript.text,
            settings.transcript_preview_chars,
        ));
    }
    Ok(merged)
}

async fn run_video(
    inner: &ServiceInner,
    file_id: &str,
    content: ContentFetcher,
) -> Result<Merged, PipelineError> {
    let bytes = content().await?;
    let mut scratch = ScratchSet::new();
    let outcome = video_steps(inner, file_id, &bytes, &mut scratch).await;
    // Every artifact (container copy, sampled frames, audio track) is
    // released here whether the steps succeeded or failed.
    scratch.cleanup().await;
    outcome
}

async fn video_steps(
    inner: &ServiceInner,
    file_id: &str,
    bytes: &[u8],
    scratch: &mut ScratchSet,
) -> Result<Merged, PipelineError> {
    let settings = &inner.settings;
    let path = scratch
        .materialize(&settings.scratch_dir, file_id, "video", bytes)
        .await?;

    let mut merged = Merged::default();

    merged.thumbnail = attempt(
        "video poster",
        file_id,
        inner.toolkit.video_poster(&path, file_id),
    )
    .await;

    merged.duration_secs = attempt(
        "duration probe",
        file_id,
        inner.toolkit.probe_duration(&path),
    )
    .await
    .unwrap_or(0.0);

    let frames_dir = settings
        .scratch_dir
        .join(format!("{}-frames", sanitize_id(file_id)));
    scratch.adopt_dir(frames_dir.clone());
    let frames = attempt(
        "frame sampling",
        file_id,
        inner
            .toolkit
            .sample_frames(&path, settings.frame_interval_secs, &frames_dir),
    )
    .await
    .unwrap_or_default();

    if !frames.is_empty() && inner.providers.tagging.enabled() {
        let picks = evenly_spaced_indices(frames.len(), settings.max_tag_frames);
        let mut union: Vec<Tag> = Vec::new();
        let mut seen = HashSet::new();
        let mut description = None;

        for &index in &picks {
            let frame = &frames[index];
            let Some(frame_bytes) =
                attempt("frame read", file_id, tokio::fs::read(&frame.path)).await
            else {
                continue;
            };
            let Some(outcome) = attempt(
                "frame tagging",
                file_id,
                inner.providers.tagging.tag_image(&frame_bytes, file_id),
            )
            .await
            else {
                continue;
            };

            let label = outcome
                .tags
                .first()
                .map(|t| t.name.clone())
                .unwrap_or_else(|| "scene".to_string());
            inner
                .markers
                .append(VideoMarker {
                    file_id: file_id.to_string(),
                    kind: MarkerKind::Scene,
                    timestamp_secs: frame.timestamp_secs,
                    label,
                    confidence: None,
                })
                .await?;

            if description.is_none() {
                description = outcome.description.clone();
            }
            for tag in outcome.tags {
                if seen.insert(tag.name.clone()) {
                    union.push(tag);
                }
            }
        }

        merged.description = description.clone();
        merged.tagging = Some(TaggingOutcome {
            tags: union,
            description,
        });
    }

    if !frames.is_empty() && settings.face_detection && inner.providers.vision.enabled() {
        let picks = evenly_spaced_indices(frames.len(), settings.max_face_frames);
        for &index in &picks {
            let frame = &frames[index];
            let Some(frame_bytes) =
                attempt("face frame read", file_id, tokio::fs::read(&frame.path)).await
            else {
                continue;
            };
            let Some(outcome) = attempt(
                "frame face detection",
                file_id,
                inner.providers.vision.analyze_image(&frame_bytes, file_id),
            )
            .await
            else {
                continue;
            };

            merged.faces_recorded += record_faces(
                inner,
                file_id,
                &outcome.faces,
                FaceOccurrenceSource::Frame(frame.timestamp_secs),
            )
            .await?;
            if merged.vision.is_none() {
                merged.vision = Some(outcome);
            }
        }
    }

    if inner.providers.geolocation.enabled() {
        if let Some(frame) = frames.first() {
            if let Some(frame_bytes) =
                attempt("geo frame read", file_id, tokio::fs::read(&frame.path)).await
            {
                merged.location = attempt(
                    "geolocation",
                    file_id,
                    inner.providers.geolocation.extract(&frame_bytes, file_id),
                )
                .await
                .flatten();
            }
        }
    }

    if inner.providers.transcription.enabled() {
        let audio_path = scratch_path(&settings.scratch_dir, file_id, "wav");
        scratch.adopt_file(audio_path.clone());
        if attempt(
            "audio extraction",
            file_id,
            inner.toolkit.extract_audio(&path, &audio_path),
        )
        .await
        .is_some()
        {
            if let Some(transcript) = attempt(
                "transcription",
                file_id,
                inner.providers.transcription.transcribe(&audio_path, file_id),
            )
            .await
            {
                for segment in &transcript.segments {
                    let text = segment.text.trim();
                    if text.chars().count() >= settings.keyword_min_segment_chars {
                        inner
                            .markers
                            .append(VideoMarker {
                                file_id: file_id.to_string(),
                                kind: MarkerKind::Keyword,
                                timestamp_secs: segment.start_secs,
                                label: prefix_chars(text, settings.keyword_label_max_chars),
                                confidence: None,
                            })
                            .await?;
                    }
                }
                merged.transcription = Some(transcript);
            }
        }
    }

    merged.tags = merge_tag_names(merged.tagging.as_ref(), None);
    merged.confidence = top_confidence(merged.tagging.as_ref(), None);
    Ok(merged)
}

/// Where a face detection came from: a still image or one video frame.
#[derive(Clone, Copy)]
enum FaceOccurrenceSource {
    Still,
    Frame(f64),
}

/// Record faces above the configured confidence floor; for video frames a
/// timeline marker accompanies each occurrence.
async fn record_faces(
    inner: &ServiceInner,
    file_id: &str,
    faces: &[crate::providers::DetectedFace],
    source: FaceOccurrenceSource,
) -> Result<usize, PipelineError> {
    let floor = inner.settings.face_confidence_floor;
    let mut recorded = 0;
    for face in faces.iter().filter(|f| f.confidence >= floor) {
        let timestamp_secs = match source {
            FaceOccurrenceSource::Still => None,
            FaceOccurrenceSource::Frame(ts) => Some(ts),
        };
        inner
            .faces
            .append(FaceOccurrence {
                file_id: file_id.to_string(),
                confidence: face.confidence,
                bounds: face.bounds,
                timestamp_secs,
            })
            .await?;
        if let FaceOccurrenceSource::Frame(ts) = source {
            inner
                .markers
                .append(VideoMarker {
                    file_id: file_id.to_string(),
                    kind: MarkerKind::Face,
                    timestamp_secs: ts,
                    label: "face".to_string(),
                    confidence: Some(face.confidence),
                })
                .await?;
        }
        recorded += 1;
    }
    Ok(recorded)
}

/// Guard one capability step: log the failure and return `None` so the
/// merged result simply lacks this contribution.
async fn attempt<T, E, F>(step: &str, file_id: &str, fut: F) -> Option<T>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(file_id, step, error = %e, "capability step unavailable, continuing");
            None
        }
    }
}

/// Union of tag names across both providers, deduplicated, first-seen
/// order preserved.
pub fn merge_tag_names(
    tagging: Option<&TaggingOutcome>,
    vision: Option<&VisionOutcome>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let names = tagging
        .into_iter()
        .flat_map(|t| t.tags.iter().map(|tag| tag.name.as_str()))
        .chain(
            vision
                .into_iter()
                .flat_map(|v| v.objects.iter().map(|o| o.name.as_str())),
        );
    for name in names {
        if seen.insert(name.to_string()) {
            out.push(name.to_string());
        }
    }
    out
}

fn top_confidence(tagging: Option<&TaggingOutcome>, vision: Option<&VisionOutcome>) -> f32 {
    let tag_conf = tagging
        .into_iter()
        .flat_map(|t| t.tags.iter().map(|tag| tag.confidence));
    let object_conf = vision
        .into_iter()
        .flat_map(|v| v.objects.iter().map(|o| o.confidence));
    tag_conf.chain(object_conf).fold(0.0, f32::max)
}

/// Choose `count` evenly spaced indices from `total` items.
pub fn evenly_spaced_indices(total: usize, count: usize) -> Vec<usize> {
    if total == 0 || count == 0 {
        return Vec::new();
    }
    if count >= total {
        return (0..total).collect();
    }
    (0..count).map(|i| i * total / count).collect()
}

/// First `max_chars` characters of a string, on char boundaries.
fn prefix_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

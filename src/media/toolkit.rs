//! Thumbnailing and audio/video extraction.
//!
//! The pipelines consume these operations through the [`MediaToolkit`]
//! trait so tests can substitute a mock. The default implementation uses
//! the `image` crate for stills and shells out to ffmpeg/ffprobe for
//! everything that needs a demuxer.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use image::ImageFormat;
use thiserror::Error;
use tokio::process::Command;

use super::sanitize_id;

/// Toolkit operation errors.
#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image processing failed: {0}")]
    Image(String),
    #[error("{tool} failed: {detail}")]
    Tool { tool: String, detail: String },
    #[error("failed to parse {tool} output: {detail}")]
    Parse { tool: String, detail: String },
}

/// One frame sampled out of a video.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub path: PathBuf,
    pub timestamp_secs: f64,
}

/// Thumbnail generation and scratch-media extraction operations.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Generate a thumbnail from image bytes; returns a thumbnail reference.
    async fn image_thumbnail(&self, bytes: &[u8], file_id: &str) -> Result<String, ToolkitError>;

    /// Produce a copy of the image bounded to `max_dimension` on its longest
    /// edge. Returns the input unchanged when already within bounds.
    async fn bounded_copy(&self, bytes: &[u8], max_dimension: u32) -> Result<Vec<u8>, ToolkitError>;

    /// Extract a poster frame from a video file; returns a thumbnail reference.
    async fn video_poster(&self, path: &Path, file_id: &str) -> Result<String, ToolkitError>;

    /// Probe a video's duration in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, ToolkitError>;

    /// Sample frames at a fixed interval into `out_dir`, ordered by time.
    async fn sample_frames(
        &self,
        path: &Path,
        interval_secs: f64,
        out_dir: &Path,
    ) -> Result<Vec<SampledFrame>, ToolkitError>;

    /// Extract the audio track of a video into `out_path` (wav).
    async fn extract_audio(&self, path: &Path, out_path: &Path) -> Result<(), ToolkitError>;
}

/// Default toolkit: `image` crate for stills, ffmpeg/ffprobe subprocesses
/// for video.
pub struct FfmpegToolkit {
    thumbnail_dir: PathBuf,
    thumbnail_size: u32,
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegToolkit {
    pub fn new(thumbnail_dir: PathBuf, thumbnail_size: u32) -> Self {
        Self {
            thumbnail_dir,
            thumbnail_size,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }

    /// Override the ffmpeg/ffprobe binary names (e.g. absolute paths).
    pub fn with_binaries(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    fn thumbnail_path(&self, file_id: &str) -> PathBuf {
        self.thumbnail_dir
            .join(format!("{}-thumb.jpg", sanitize_id(file_id)))
    }

    async fn run(&self, tool: &str, args: &[&str]) -> Result<Vec<u8>, ToolkitError> {
        let output = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(ToolkitError::Tool {
                tool: tool.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn image_thumbnail(&self, bytes: &[u8], file_id: &str) -> Result<String, ToolkitError> {
        tokio::fs::create_dir_all(&self.thumbnail_dir).await?;
        let out = self.thumbnail_path(file_id);
        let data = bytes.to_vec();
        let size = self.thumbnail_size;
        let out_clone = out.clone();
        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&data).map_err(|e| ToolkitError::Image(e.to_string()))?;
            let thumb = img.thumbnail(size, size).to_rgb8();
            thumb
                .save_with_format(&out_clone, ImageFormat::Jpeg)
                .map_err(|e| ToolkitError::Image(e.to_string()))
        })
        .await
        .map_err(|e| ToolkitError::Image(format!("thumbnail task failed: {e}")))??;
        Ok(out.to_string_lossy().into_owned())
    }

    async fn bounded_copy(&self, bytes: &[u8], max_dimension: u32) -> Result<Vec<u8>, ToolkitError> {
        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&data).map_err(|e| ToolkitError::Image(e.to_string()))?;
            if img.width().max(img.height()) <= max_dimension {
                return Ok(data);
            }
            let resized = img.thumbnail(max_dimension, max_dimension).to_rgb8();
            let mut buf = Cursor::new(Vec::new());
            resized
                .write_to(&mut buf, ImageFormat::Jpeg)
                .map_err(|e| ToolkitError::Image(e.to_string()))?;
            Ok(buf.into_inner())
        })
        .await
        .map_err(|e| ToolkitError::Image(format!("resize task failed: {e}")))?
    }

    async fn video_poster(&self, path: &Path, file_id: &str) -> Result<String, ToolkitError> {
        tokio::fs::create_dir_all(&self.thumbnail_dir).await?;
        let out = self.thumbnail_path(file_id);
        let scale = format!(
            "scale={s}:{s}:force_original_aspect_ratio=decrease",
            s = self.thumbnail_size
        );
        self.run(
            &self.ffmpeg,
            &[
                "-hide_banner",
                "-loglevel",
                "error",
                "-ss",
                "1",
                "-i",
                &path.to_string_lossy(),
                "-vframes",
                "1",
                "-vf",
                &scale,
                "-y",
                &out.to_string_lossy(),
            ],
        )
        .await?;
        Ok(out.to_string_lossy().into_owned())
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, ToolkitError> {
        let stdout = self
            .run(
                &self.ffprobe,
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                    &path.to_string_lossy(),
                ],
            )
            .await?;
        let text = String::from_utf8_lossy(&stdout);
        text.trim().parse::<f64>().map_err(|e| ToolkitError::Parse {
            tool: self.ffprobe.clone(),
            detail: format!("duration {:?}: {e}", text.trim()),
        })
    }

    async fn sample_frames(
        &self,
        path: &Path,
        interval_secs: f64,
        out_dir: &Path,
    ) -> Result<Vec<SampledFrame>, ToolkitError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let interval = if interval_secs > 0.0 { interval_secs } else { 1.0 };
        let fps = format!("fps=1/{}", interval);
        let pattern = out_dir.join("frame-%05d.jpg");
        self.run(
            &self.ffmpeg,
            &[
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                &path.to_string_lossy(),
                "-vf",
                &fps,
                "-y",
                &pattern.to_string_lossy(),
            ],
        )
        .await?;

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("frame-") && name.ends_with(".jpg") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, name)| SampledFrame {
                path: out_dir.join(name),
                timestamp_secs: i as f64 * interval,
            })
            .collect())
    }

    async fn extract_audio(&self, path: &Path, out_path: &Path) -> Result<(), ToolkitError> {
        self.run(
            &self.ffmpeg,
            &[
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                &path.to_string_lossy(),
                "-vn",
                "-ac",
                "1",
                "-ar",
                "16000",
                "-y",
                &out_path.to_string_lossy(),
            ],
        )
        .await?;
        Ok(())
    }
}

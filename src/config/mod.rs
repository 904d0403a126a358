//! Typed configuration.
//!
//! Settings are loaded from a JSON5 file with serde defaults for every
//! field, so a missing or partial config file always yields a usable
//! configuration. The queue concurrency limit is consumed once at
//! construction; pipeline knobs are read at point of use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Root settings structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Maximum number of analysis pipelines in flight at once.
    pub concurrency: usize,
    /// Age after which terminal job records are garbage-collected, seconds.
    pub job_retention_secs: u64,
    /// Interval of the queue's owned cleanup timer, seconds.
    pub cleanup_interval_secs: u64,
    /// Pipeline tuning knobs.
    pub pipeline: PipelineSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            job_retention_secs: 3600,
            cleanup_interval_secs: 300,
            pipeline: PipelineSettings::default(),
        }
    }
}

/// Knobs consumed by the per-kind analysis pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Master switch for recording face occurrences from vision results.
    pub face_detection: bool,
    /// Faces below this confidence are discarded.
    pub face_confidence_floor: f32,
    /// Seconds between sampled video frames.
    pub frame_interval_secs: f64,
    /// Upper bound on frames analyzed for tags per video.
    pub max_tag_frames: usize,
    /// Upper bound on frames analyzed for faces per video.
    pub max_face_frames: usize,
    /// Longest edge of the bounded-size analysis copy, pixels.
    pub max_analysis_dimension: u32,
    /// Longest edge of generated thumbnails, pixels.
    pub thumbnail_size: u32,
    /// Characters of transcript kept as an audio file's description.
    pub transcript_preview_chars: usize,
    /// Transcript segments shorter than this produce no keyword marker.
    pub keyword_min_segment_chars: usize,
    /// Keyword marker labels are truncated to this length.
    pub keyword_label_max_chars: usize,
    /// Directory for scratch materializations of file bytes.
    pub scratch_dir: PathBuf,
    /// Directory where generated thumbnails are written.
    pub thumbnail_dir: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let base = std::env::temp_dir().join("percept");
        Self {
            face_detection: true,
            face_confidence_floor: 0.7,
            frame_interval_secs: 10.0,
            max_tag_frames: 5,
            max_face_frames: 3,
            max_analysis_dimension: 1280,
            thumbnail_size: 320,
            transcript_preview_chars: 500,
            keyword_min_segment_chars: 10,
            keyword_label_max_chars: 80,
            scratch_dir: base.join("scratch"),
            thumbnail_dir: base.join("thumbnails"),
        }
    }
}

impl Settings {
    /// Load settings from a JSON5 file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        json5::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load settings from the default location, falling back to defaults
    /// when no config file exists.
    pub fn load_or_default() -> Self {
        let path = default_config_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(settings) => return settings,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                }
            }
        }
        Self::default()
    }
}

/// Default config file location: `<config_dir>/percept/config.json5`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("percept")
        .join("config.json5")
}

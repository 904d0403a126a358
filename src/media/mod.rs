//! Media kinds, content access, and scratch-file lifecycle.
//!
//! A pipeline run materializes file bytes into scratch files when a
//! capability needs a path instead of bytes (transcription, frame
//! sampling). Scratch names derive deterministically from the file id, so
//! concurrent pipelines for different ids never collide; everything a run
//! creates is tracked in a [`ScratchSet`] and released on every exit path.

pub mod toolkit;

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors fetching file content from the storage layer.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("content unavailable: {0}")]
    Unavailable(String),
}

/// Zero-argument async function returning the full bytes of one file,
/// bound per call by the storage layer.
pub type ContentFetcher =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<Vec<u8>, ContentError>> + Send>;

/// Kind of media being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    /// Parse a kind name as accepted by the analysis entry point.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.to_lowercase().as_str() {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }

    /// Determine the media kind from a MIME type string.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let lower = mime.to_lowercase();
        if lower.starts_with("image/") {
            Some(MediaKind::Image)
        } else if lower.starts_with("video/") {
            Some(MediaKind::Video)
        } else if lower.starts_with("audio/") {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduce an opaque file id to a filesystem-safe name fragment.
///
/// Ids are opaque to this crate and may contain separators; scratch and
/// thumbnail names must not escape their directories.
pub fn sanitize_id(file_id: &str) -> String {
    file_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Deterministic scratch path for one file id and suffix.
pub fn scratch_path(dir: &Path, file_id: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_id(file_id), suffix))
}

/// Tracks every scratch artifact one pipeline run creates so all of them
/// are released on exit, whether the pipeline succeeded or failed.
///
/// Cleanup is explicit and async ([`ScratchSet::cleanup`]); `Drop` removes
/// anything left behind as a synchronous best-effort backstop.
#[derive(Debug, Default)]
pub struct ScratchSet {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl ScratchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write bytes to a deterministic scratch file and track it.
    pub async fn materialize(
        &mut self,
        dir: &Path,
        file_id: &str,
        suffix: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, std::io::Error> {
        tokio::fs::create_dir_all(dir).await?;
        let path = scratch_path(dir, file_id, suffix);
        tokio::fs::write(&path, bytes).await?;
        self.files.push(path.clone());
        Ok(path)
    }

    /// Track an externally-created scratch file.
    pub fn adopt_file(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    /// Track an externally-created scratch directory (removed recursively).
    pub fn adopt_dir(&mut self, path: PathBuf) {
        self.dirs.push(path);
    }

    /// Remove every tracked artifact. Failures are logged, not raised.
    pub async fn cleanup(&mut self) {
        for path in self.files.drain(..) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch file");
                }
            }
        }
        for path in self.dirs.drain(..) {
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch dir");
                }
            }
        }
    }
}

impl Drop for ScratchSet {
    fn drop(&mut self) {
        for path in self.files.drain(..) {
            let _ = std::fs::remove_file(&path);
        }
        for path in self.dirs.drain(..) {
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}

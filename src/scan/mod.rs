//! Batch scan scheduler.
//!
//! Sweeps the file corpus for one of four fixed categories of missing
//! analysis, resubmitting eligible files through the orchestrator (or, for
//! geolocation, calling the provider directly), and records the aggregate
//! run outcome on the category's schedule row. Cadence predicates are pure
//! functions over a supplied wall clock; an external timer polls
//! [`Scanner::check_scheduled_scans`].

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::analysis::AnalysisService;
use crate::media::{ContentFetcher, MediaKind};
use crate::providers::GeolocationProvider;
use crate::store::{AnalysisStore, CatalogEntry, FileCatalog, RecordPatch, StoreError};

/// The four fixed scan categories. One schedule row exists per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    FaceRecognition,
    AutoTagging,
    GeolocationExtraction,
    FullAnalysis,
}

impl ScanKind {
    pub const ALL: [ScanKind; 4] = [
        ScanKind::FaceRecognition,
        ScanKind::AutoTagging,
        ScanKind::GeolocationExtraction,
        ScanKind::FullAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::FaceRecognition => "face_recognition",
            ScanKind::AutoTagging => "auto_tagging",
            ScanKind::GeolocationExtraction => "geolocation_extraction",
            ScanKind::FullAnalysis => "full_analysis",
        }
    }

    /// Media kinds this category applies to.
    fn applies_to(&self, kind: MediaKind) -> bool {
        match self {
            ScanKind::FaceRecognition
            | ScanKind::AutoTagging
            | ScanKind::GeolocationExtraction => {
                matches!(kind, MediaKind::Image | MediaKind::Video)
            }
            ScanKind::FullAnalysis => true,
        }
    }

    /// Whether a file already has what this category would produce.
    fn already_satisfied(&self, entry: &CatalogEntry) -> bool {
        match self {
            ScanKind::FaceRecognition => entry.has_faces,
            ScanKind::AutoTagging => entry.has_tags,
            ScanKind::GeolocationExtraction => entry.has_location,
            ScanKind::FullAnalysis => entry.analysis_completed,
        }
    }
}

impl FromStr for ScanKind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face_recognition" => Ok(ScanKind::FaceRecognition),
            "auto_tagging" => Ok(ScanKind::AutoTagging),
            "geolocation_extraction" => Ok(ScanKind::GeolocationExtraction),
            "full_analysis" => Ok(ScanKind::FullAnalysis),
            other => Err(ScanError::UnknownScanType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a category fires automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanCadence {
    Manual,
    Hourly,
    Daily,
    Weekly,
}

/// Terminal status of the last run of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanRunStatus {
    Completed,
    Failed,
}

/// One schedule row; exactly one exists per [`ScanKind`], updated in
/// place, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSchedule {
    pub kind: ScanKind,
    pub cadence: ScanCadence,
    pub enabled: bool,
    pub last_status: Option<ScanRunStatus>,
    pub last_count: Option<usize>,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ScanSchedule {
    pub fn manual(kind: ScanKind) -> Self {
        Self {
            kind,
            cadence: ScanCadence::Manual,
            enabled: true,
            last_status: None,
            last_count: None,
            last_error: None,
            last_run_at: None,
        }
    }
}

/// Partial update for a schedule row; `Some` fields are written.
/// `last_error` uses a nested option so a run can clear a previous error.
#[derive(Debug, Clone, Default)]
pub struct SchedulePatch {
    pub cadence: Option<ScanCadence>,
    pub enabled: Option<bool>,
    pub last_status: Option<ScanRunStatus>,
    pub last_count: Option<usize>,
    pub last_error: Option<Option<String>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl SchedulePatch {
    pub fn apply(self, schedule: &mut ScanSchedule) {
        if let Some(cadence) = self.cadence {
            schedule.cadence = cadence;
        }
        if let Some(enabled) = self.enabled {
            schedule.enabled = enabled;
        }
        if let Some(status) = self.last_status {
            schedule.last_status = Some(status);
        }
        if let Some(count) = self.last_count {
            schedule.last_count = Some(count);
        }
        if let Some(error) = self.last_error {
            schedule.last_error = error;
        }
        if let Some(at) = self.last_run_at {
            schedule.last_run_at = Some(at);
        }
    }
}

/// Schedule row repository.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get(&self, kind: ScanKind) -> Result<Option<ScanSchedule>, StoreError>;
    async fn list(&self) -> Result<Vec<ScanSchedule>, StoreError>;
    async fn update(&self, kind: ScanKind, patch: SchedulePatch) -> Result<(), StoreError>;
}

/// Aggregate result of one scan run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan_type: ScanKind,
    pub files_processed: usize,
    pub error: Option<String>,
}

/// Scan scheduler errors.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("unknown scan type: {0}")]
    UnknownScanType(String),
    #[error("no schedule exists for scan type {0}")]
    UnknownSchedule(ScanKind),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("candidate enumeration failed: {0}")]
    Enumeration(String),
}

/// Pure cadence predicate over the supplied wall clock.
///
/// Manual never fires; hourly fires within minute 0 of every hour; daily
/// within minute 0 of hour 3; weekly within minute 0 of hour 3 on Sunday.
pub fn should_run_now(cadence: ScanCadence, now: DateTime<Utc>) -> bool {
    match cadence {
        ScanCadence::Manual => false,
        ScanCadence::Hourly => now.minute() == 0,
        ScanCadence::Daily => now.hour() == 3 && now.minute() == 0,
        ScanCadence::Weekly => {
            now.weekday() == Weekday::Sun && now.hour() == 3 && now.minute() == 0
        }
    }
}

struct ScannerInner {
    schedules: Arc<dyn ScheduleStore>,
    catalog: Arc<dyn FileCatalog>,
    records: Arc<dyn AnalysisStore>,
    analysis: AnalysisService,
    geolocation: Arc<dyn GeolocationProvider>,
    /// Supervised set of fired scheduled scans; reaped on every check so
    /// failures surface centrally instead of detaching silently.
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

/// The scan scheduler. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
}

impl Scanner {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        catalog: Arc<dyn FileCatalog>,
        records: Arc<dyn AnalysisStore>,
        analysis: AnalysisService,
        geolocation: Arc<dyn GeolocationProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                schedules,
                catalog,
                records,
                analysis,
                geolocation,
                tasks: tokio::sync::Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Run one scan category to completion.
    ///
    /// Per-file failures are logged and excluded from the processed count
    /// but never abort the batch; the schedule row ends completed with the
    /// count. A failure enumerating candidates marks the row failed and is
    /// re-raised.
    pub async fn run_scan(&self, kind: ScanKind) -> Result<ScanOutcome, ScanError> {
        let schedule = self.inner.schedules.get(kind).await?;
        if schedule.is_none() {
            return Err(ScanError::UnknownSchedule(kind));
        }

        tracing::info!(scan_type = kind.as_str(), "scan started");
        match self.sweep(kind).await {
            Ok(processed) => {
                self.inner
                    .schedules
                    .update(
                        kind,
                        SchedulePatch {
                            last_status: Some(ScanRunStatus::Completed),
                            last_count: Some(processed),
                            last_error: Some(None),
                            last_run_at: Some(Utc::now()),
                            ..SchedulePatch::default()
                        },
                    )
                    .await?;
                tracing::info!(scan_type = kind.as_str(), processed, "scan completed");
                Ok(ScanOutcome {
                    scan_type: kind,
                    files_processed: processed,
                    error: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(persist) = self
                    .inner
                    .schedules
                    .update(
                        kind,
                        SchedulePatch {
                            last_status: Some(ScanRunStatus::Failed),
                            last_error: Some(Some(message.clone())),
                            last_run_at: Some(Utc::now()),
                            ..SchedulePatch::default()
                        },
                    )
                    .await
                {
                    tracing::error!(scan_type = kind.as_str(), error = %persist, "failed to record scan failure");
                }
                tracing::warn!(scan_type = kind.as_str(), error = %message, "scan failed");
                Err(e)
            }
        }
    }

    async fn sweep(&self, kind: ScanKind) -> Result<usize, ScanError> {
        let entries = self
            .inner
            .catalog
            .list()
            .await
            .map_err(|e| ScanError::Enumeration(e.to_string()))?;

        let mut processed = 0;
        for entry in entries {
            let Some(media_kind) = MediaKind::from_mime(&entry.content_type) else {
                continue;
            };
            if !kind.applies_to(media_kind) || kind.already_satisfied(&entry) {
                continue;
            }

            let ok = match kind {
                ScanKind::GeolocationExtraction => {
                    self.extract_location(&entry.file_id).await
                }
                _ => {
                    let catalog = Arc::clone(&self.inner.catalog);
                    let file_id = entry.file_id.clone();
                    let fetcher: ContentFetcher =
                        Box::new(move || Box::pin(async move { catalog.fetch(&file_id).await }));
                    self.inner
                        .analysis
                        .analyze(&entry.file_id, media_kind.as_str(), fetcher)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            };

            match ok {
                Ok(()) => processed += 1,
                Err(e) => {
                    tracing::warn!(
                        scan_type = kind.as_str(),
                        file_id = %entry.file_id,
                        error = %e,
                        "scan item failed"
                    );
                }
            }
        }
        Ok(processed)
    }

    /// Geolocation scans skip the full pipeline and call the provider
    /// directly on the file's bytes.
    async fn extract_location(&self, file_id: &str) -> Result<(), String> {
        let bytes = self
            .inner
            .catalog
            .fetch(file_id)
            .await
            .map_err(|e| e.to_string())?;
        let point = self
            .inner
            .geolocation
            .extract(&bytes, file_id)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(point) = point {
            let patch = RecordPatch {
                location: Some(point),
                ..RecordPatch::default()
            };
            match self.inner.records.update(file_id, patch).await {
                Ok(()) => {}
                // Files never analyzed have no record yet; the extraction
                // itself still counts as processed.
                Err(StoreError::NotFound(_)) => {
                    tracing::debug!(file_id, "no analysis record to attach location to");
                }
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }

    /// Fire every enabled schedule whose cadence predicate is true now,
    /// without waiting for any of them. Failures are logged when the fired
    /// tasks are reaped, never surfaced to the caller.
    pub async fn check_scheduled_scans(&self) {
        let schedules = match self.inner.schedules.list().await {
            Ok(schedules) => schedules,
            Err(e) => {
                tracing::error!(error = %e, "failed to list scan schedules");
                return;
            }
        };

        let now = Utc::now();
        let mut tasks = self.inner.tasks.lock().await;
        while let Some(reaped) = tasks.try_join_next() {
            if let Err(e) = reaped {
                tracing::error!(error = %e, "scheduled scan task panicked");
            }
        }

        for schedule in schedules {
            if !schedule.enabled || !should_run_now(schedule.cadence, now) {
                continue;
            }
            let scanner = self.clone();
            let kind = schedule.kind;
            tasks.spawn(async move {
                if let Err(e) = scanner.run_scan(kind).await {
                    tracing::error!(scan_type = kind.as_str(), error = %e, "scheduled scan failed");
                }
            });
        }
    }

    /// Wait for every fired scheduled scan to finish.
    pub async fn drain(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        while let Some(reaped) = tasks.join_next().await {
            if let Err(e) = reaped {
                tracing::error!(error = %e, "scheduled scan task panicked");
            }
        }
    }
}

//! Analysis orchestrator.
//!
//! Owns the per-file analysis record and its state machine
//! (pending → processing → completed/failed), builds one pipeline per media
//! kind, merges provider outputs, and submits the work to the job queue.
//! Submission never waits for the pipeline; callers poll the record or the
//! job for progress.
//!
//! Overlapping submissions for the same file id are legal: the record is
//! reset to pending on every submission, and a per-file-id keyed lock
//! serializes the pipeline bodies so two runs for one id never interleave
//! their writes. Runs for different ids only contend on the queue's
//! concurrency budget.

pub mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::config::PipelineSettings;
use crate::jobs::{JobFuture, JobId, JobQueue};
use crate::media::{ContentFetcher, MediaKind};
use crate::media::toolkit::MediaToolkit;
use crate::providers::Providers;
use crate::store::{AnalysisRecord, AnalysisStore, FaceStore, MarkerStore, SearchIndex, StoreError};

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("unsupported media kind: {0}")]
    UnsupportedKind(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Receipt for one accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisTicket {
    pub job_id: JobId,
    pub file_id: String,
    pub kind: MediaKind,
}

/// One file in a batch submission.
pub struct BatchItem {
    pub file_id: String,
    pub kind: String,
    pub content: ContentFetcher,
}

/// Outcome of one batch item, in input order.
pub struct BatchOutcome {
    pub file_id: String,
    pub result: Result<AnalysisTicket, AnalysisError>,
}

/// Everything an orchestrator depends on.
pub struct AnalysisDeps {
    pub queue: Arc<JobQueue>,
    pub records: Arc<dyn AnalysisStore>,
    pub markers: Arc<dyn MarkerStore>,
    pub faces: Arc<dyn FaceStore>,
    pub search: Arc<dyn SearchIndex>,
    pub providers: Providers,
    pub toolkit: Arc<dyn MediaToolkit>,
}

pub(crate) struct ServiceInner {
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) records: Arc<dyn AnalysisStore>,
    pub(crate) markers: Arc<dyn MarkerStore>,
    pub(crate) faces: Arc<dyn FaceStore>,
    pub(crate) search: Arc<dyn SearchIndex>,
    pub(crate) providers: Providers,
    pub(crate) toolkit: Arc<dyn MediaToolkit>,
    pub(crate) settings: PipelineSettings,
    pub(crate) locks: KeyedLocks,
}

/// Per-file-id async locks serializing same-id pipeline runs.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            // Entries nobody else holds are stale; prune them here so the
            // map stays bounded by the number of in-flight pipelines.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// The analysis orchestrator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct AnalysisService {
    inner: Arc<ServiceInner>,
}

impl AnalysisService {
    pub fn new(deps: AnalysisDeps, settings: PipelineSettings) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                queue: deps.queue,
                records: deps.records,
                markers: deps.markers,
                faces: deps.faces,
                search: deps.search,
                providers: deps.providers,
                toolkit: deps.toolkit,
                settings,
                locks: KeyedLocks::default(),
            }),
        }
    }

    /// Submit one file for analysis.
    ///
    /// Validates the kind (no job is created for an unrecognized kind),
    /// creates or resets the file's record to pending, queues the pipeline,
    /// and returns without waiting for it.
    pub async fn analyze(
        &self,
        file_id: &str,
        kind: &str,
        content: ContentFetcher,
    ) -> Result<AnalysisTicket, AnalysisError> {
        let media_kind =
            MediaKind::parse(kind).ok_or_else(|| AnalysisError::UnsupportedKind(kind.to_string()))?;

        self.inner.records.upsert_pending(file_id, media_kind).await?;

        let inner = Arc::clone(&self.inner);
        let id = file_id.to_string();
        let task: JobFuture = Box::pin(pipeline::execute(inner, id, media_kind, content));
        let job_id = self.inner.queue.submit(
            task,
            serde_json::json!({ "file_id": file_id, "kind": media_kind.as_str() }),
        );

        tracing::info!(file_id, kind = media_kind.as_str(), job_id = %job_id, "analysis submitted");
        Ok(AnalysisTicket {
            job_id,
            file_id: file_id.to_string(),
            kind: media_kind,
        })
    }

    /// Submit many files, each independently; one item's failure never
    /// blocks the rest. Outcomes are returned in input order.
    pub async fn analyze_batch(&self, items: Vec<BatchItem>) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let result = self.analyze(&item.file_id, &item.kind, item.content).await;
            if let Err(ref e) = result {
                tracing::warn!(file_id = %item.file_id, error = %e, "batch submission failed");
            }
            outcomes.push(BatchOutcome {
                file_id: item.file_id,
                result,
            });
        }
        outcomes
    }

    /// The current analysis record for a file id, if any.
    pub async fn record(&self, file_id: &str) -> Result<Option<AnalysisRecord>, AnalysisError> {
        Ok(self.inner.records.get(file_id).await?)
    }
}

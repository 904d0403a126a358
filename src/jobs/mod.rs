//! Bounded-concurrency job queue.
//!
//! Runs submitted async tasks on a fixed-size worker pool with best-effort,
//! in-memory status tracking. No durability: job records live in an owned
//! [`JobStore`] and are garbage-collected by age once terminal. Excess
//! submissions wait FIFO; a failing (or panicking) task is recorded failed
//! with its message and never affects sibling tasks or the pool. No
//! priorities, no cancellation of queued or running work, no per-task
//! timeout.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier of one submitted job.
pub type JobId = Uuid;

/// The unit of work a job runs: an async task resolving to a JSON result
/// or an error message.
pub type JobFuture = BoxFuture<'static, Result<serde_json::Value, String>>;

/// Lifecycle of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Ephemeral, in-memory record of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Counts per status plus the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Explicitly owned job registry. Injectable into [`JobQueue`] so tests
/// (and embedders) control its construction and teardown.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, record: JobRecord) {
        self.jobs.write().insert(record.id, record);
    }

    fn set_processing(&self, id: JobId) {
        if let Some(job) = self.jobs.write().get_mut(&id) {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
        }
    }

    fn finish(&self, id: JobId, outcome: Result<serde_json::Value, String>) {
        if let Some(job) = self.jobs.write().get_mut(&id) {
            job.completed_at = Some(Utc::now());
            match outcome {
                Ok(value) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(value);
                }
                Err(message) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(message);
                }
            }
        }
    }

    /// Look up one job, if still retained.
    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.read().get(&id).cloned()
    }

    /// Snapshot counts per status.
    pub fn metrics(&self) -> QueueMetrics {
        let jobs = self.jobs.read();
        let mut metrics = QueueMetrics {
            queued: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            total: jobs.len(),
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => metrics.queued += 1,
                JobStatus::Processing => metrics.processing += 1,
                JobStatus::Completed => metrics.completed += 1,
                JobStatus::Failed => metrics.failed += 1,
            }
        }
        metrics
    }

    /// Remove terminal jobs whose completion timestamp is older than
    /// `max_age`. Active and queued jobs are untouched. Returns the number
    /// removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job.completed_at.map(|at| at < cutoff).unwrap_or(false))
        });
        before - jobs.len()
    }
}

struct QueuedJob {
    id: JobId,
    task: JobFuture,
}

/// Bounded-concurrency async task executor.
///
/// Workers are started at construction, sized by the `concurrency`
/// parameter. Submission never blocks; tasks beyond the budget wait FIFO.
pub struct JobQueue {
    store: JobStore,
    tx: mpsc::UnboundedSender<QueuedJob>,
    shutdown: CancellationToken,
}

impl JobQueue {
    /// Create a queue with its own job store.
    pub fn new(concurrency: usize) -> Self {
        Self::with_store(concurrency, JobStore::new())
    }

    /// Create a queue over an injected job store.
    pub fn with_store(concurrency: usize, store: JobStore) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<QueuedJob>();
        let rx = Arc::new(Mutex::new(rx));
        let shutdown = CancellationToken::new();

        for worker in 0..concurrency {
            let rx = Arc::clone(&rx);
            let store = store.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            job = rx.recv() => job,
                            _ = token.cancelled() => None,
                        }
                    };
                    let Some(job) = next else { break };
                    store.set_processing(job.id);
                    let outcome = AssertUnwindSafe(job.task).catch_unwind().await;
                    let outcome = match outcome {
                        Ok(result) => result,
                        Err(panic) => Err(panic_message(panic)),
                    };
                    if let Err(ref message) = outcome {
                        tracing::warn!(job_id = %job.id, worker, error = %message, "job failed");
                    }
                    store.finish(job.id, outcome);
                }
            });
        }

        Self {
            store,
            tx,
            shutdown,
        }
    }

    /// Submit a task. Returns immediately with the assigned job id; the
    /// task starts once a worker is free.
    pub fn submit(&self, task: JobFuture, metadata: serde_json::Value) -> JobId {
        let id = Uuid::new_v4();
        self.store.insert(JobRecord {
            id,
            status: JobStatus::Queued,
            metadata,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        });
        if self.tx.send(QueuedJob { id, task }).is_err() {
            self.store
                .finish(id, Err("queue is shut down".to_string()));
        }
        id
    }

    /// Look up one job's record, if still retained.
    pub fn status(&self, id: JobId) -> Option<JobRecord> {
        self.store.get(id)
    }

    /// Snapshot counts per status.
    pub fn metrics(&self) -> QueueMetrics {
        self.store.metrics()
    }

    /// Remove terminal jobs older than `max_age`; see [`JobStore::cleanup`].
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.store.cleanup(max_age)
    }

    /// Start the owned cleanup timer, removing terminal jobs older than
    /// `retention` every `interval`. Stops on [`JobQueue::shutdown`] or
    /// when the queue is dropped.
    pub fn spawn_cleanup(&self, retention: Duration, interval: Duration) {
        let store = self.store.clone();
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.cleanup(retention);
                        if removed > 0 {
                            tracing::debug!(removed, "cleaned up terminal jobs");
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    /// Stop the worker pool and the cleanup timer. Queued tasks that have
    /// not started will not run.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}

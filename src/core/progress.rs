//! In-memory progress tracking for export jobs.
//!
//! Active jobs are updated on every progress tick. Finished jobs move into
//! a short history so a client can still see how the last exports went.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::RwLock;

use super::models::{ExportStatus, JobRecord};

const HISTORY_LIMIT: usize = 20;

#[derive(Default)]
struct Jobs {
    active: HashMap<String, JobRecord>,
    finished: VecDeque<JobRecord>,
}

/// Thread-safe store for job progress, shared through `AppContext`.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<Jobs>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in the `Ready` state.
    pub async fn start(&self, job_id: &str, drive_name: &str) {
        let mut jobs = self.inner.write().await;
        jobs.active.insert(
            job_id.to_string(),
            JobRecord {
                job_id: job_id.to_string(),
                drive_name: drive_name.to_string(),
                started_at: Local::now(),
                status: ExportStatus::Ready,
            },
        );
    }

    /// Update the status of an active job. Unknown ids are ignored.
    pub async fn update(&self, job_id: &str, status: ExportStatus) {
        let mut jobs = self.inner.write().await;
        if let Some(record) = jobs.active.get_mut(job_id) {
            record.status = status;
        }
    }

    /// Record the final status and move the job into history.
    pub async fn finish(&self, job_id: &str, status: ExportStatus) {
        let mut jobs = self.inner.write().await;
        let Some(mut record) = jobs.active.remove(job_id) else {
            return;
        };
        record.status = status;

        if jobs.finished.len() == HISTORY_LIMIT {
            jobs.finished.pop_back();
        }
        jobs.finished.push_front(record);
    }

    /// Look up a job, active or finished.
    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        let jobs = self.inner.read().await;
        jobs.active
            .get(job_id)
            .or_else(|| jobs.finished.iter().find(|r| r.job_id == job_id))
            .cloned()
    }

    /// All active jobs, oldest first.
    pub async fn active(&self) -> Vec<JobRecord> {
        let jobs = self.inner.read().await;
        let mut active: Vec<_> = jobs.active.values().cloned().collect();
        active.sort_by_key(|r| r.started_at);
        active
    }

    /// Finished jobs, most recent first.
    pub async fn recent(&self) -> Vec<JobRecord> {
        let jobs = self.inner.read().await;
        jobs.finished.iter().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.read().await.active.len()
    }
}

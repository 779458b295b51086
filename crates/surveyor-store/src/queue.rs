//! Named work queues and the job table behind them.
//!
//! Jobs are enqueued on a named queue, pulled by workers consuming that
//! queue, and kept after they end until their result TTL runs out.
//! Cancelling a job stops tracking it: it leaves its queue and later
//! fetches or writes report [`StoreError::JobNotFound`].

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use surveyor_core::{
    Job, JobHandle, JobId, JobProgress, JobState, ProgressUpdate, ScanPayload, ScanResults,
};

use crate::error::{Result, StoreError};

/// Queue runtime seen by the dispatcher, the workers, and the postprocessor.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit work to a named queue. Does not wait for execution.
    async fn enqueue(
        &self,
        queue: &str,
        payload: ScanPayload,
        timeout: Duration,
        result_ttl: Duration,
    ) -> Result<JobHandle>;

    /// Fetch a job by id. Unknown, cancelled, and expired jobs are not found.
    async fn fetch(&self, id: JobId) -> Result<Job>;

    /// Stop tracking a job. Does not interrupt a running worker.
    async fn cancel(&self, id: JobId) -> Result<()>;

    /// Wait for the next job on `queue` and mark it running.
    async fn dequeue(&self, queue: &str) -> Result<Job>;

    /// Apply one progress update atomically and return the new record.
    async fn update_progress(&self, id: JobId, update: ProgressUpdate) -> Result<JobProgress>;

    /// Store the result payload and mark the job finished.
    async fn finish(&self, id: JobId, result: ScanResults) -> Result<()>;

    /// Mark the job failed, keeping whatever progress was persisted.
    async fn fail(&self, id: JobId, reason: &str) -> Result<()>;

    /// Drop ended jobs past their retention window. Returns how many.
    async fn purge_expired(&self) -> usize;
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    pending: HashMap<String, VecDeque<JobId>>,
}

impl QueueState {
    fn live_job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        let now = Utc::now();
        match self.jobs.get_mut(&id) {
            Some(job) if !job.is_expired(now) => Ok(job),
            _ => Err(StoreError::JobNotFound(id)),
        }
    }

    fn pop_ready(&mut self, queue: &str) -> Option<Job> {
        let pending = self.pending.get_mut(queue)?;
        while let Some(id) = pending.pop_front() {
            // Cancelled jobs are gone from the table; skip them.
            if let Some(job) = self.jobs.get_mut(&id) {
                if job.state == JobState::Queued {
                    job.state = JobState::Running;
                    job.started_at = Some(Utc::now());
                    return Some(job.clone());
                }
            }
        }
        None
    }

    fn is_idle(&self) -> bool {
        !self
            .jobs
            .values()
            .any(|j| matches!(j.state, JobState::Queued | JobState::Running))
    }
}

/// Process-local queue runtime.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    work: Notify,
    idle: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve once no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().await.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Number of jobs waiting on `queue`.
    pub async fn pending(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state
            .pending
            .get(queue)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        state
                            .jobs
                            .get(id)
                            .is_some_and(|j| j.state == JobState::Queued)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    async fn end(&self, id: JobId, f: impl FnOnce(&mut Job)) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let job = state.live_job_mut(id)?;
            f(job);
            job.ended_at = Some(Utc::now());
        }
        self.idle.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: ScanPayload,
        timeout: Duration,
        result_ttl: Duration,
    ) -> Result<JobHandle> {
        let job = Job::new(queue, payload, timeout, result_ttl);
        let handle = job.handle();
        {
            let mut state = self.state.lock().await;
            state
                .pending
                .entry(queue.to_string())
                .or_default()
                .push_back(job.id);
            state.jobs.insert(job.id, job);
        }
        tracing::debug!(job_id = %handle.id, queue = %queue, "Job enqueued");
        self.work.notify_waiters();
        Ok(handle)
    }

    async fn fetch(&self, id: JobId) -> Result<Job> {
        let mut state = self.state.lock().await;
        state.live_job_mut(id).map(|job| job.clone())
    }

    async fn cancel(&self, id: JobId) -> Result<()> {
        let removed = {
            let mut state = self.state.lock().await;
            let removed = state.jobs.remove(&id);
            if let Some(job) = &removed {
                if let Some(pending) = state.pending.get_mut(&job.queue) {
                    pending.retain(|queued| *queued != id);
                }
            }
            removed
        };
        match removed {
            Some(_) => {
                tracing::debug!(job_id = %id, "Job cancelled");
                self.idle.notify_waiters();
                Ok(())
            }
            None => Err(StoreError::JobNotFound(id)),
        }
    }

    async fn dequeue(&self, queue: &str) -> Result<Job> {
        loop {
            let notified = self.work.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.state.lock().await.pop_ready(queue) {
                return Ok(job);
            }
            notified.await;
        }
    }

    async fn update_progress(&self, id: JobId, update: ProgressUpdate) -> Result<JobProgress> {
        let mut state = self.state.lock().await;
        let job = state.live_job_mut(id)?;
        job.progress.apply(update);
        Ok(job.progress.clone())
    }

    async fn finish(&self, id: JobId, result: ScanResults) -> Result<()> {
        self.end(id, |job| {
            job.state = JobState::Finished;
            job.result = Some(result);
        })
        .await
    }

    async fn fail(&self, id: JobId, reason: &str) -> Result<()> {
        self.end(id, |job| {
            job.state = JobState::Failed;
            job.failure = Some(reason.to_string());
        })
        .await
    }

    async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !job.is_expired(now));
        let purged = before - state.jobs.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired jobs");
        }
        purged
    }
}

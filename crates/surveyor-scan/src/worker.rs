//! Queue workers.
//!
//! Spawns a fixed number of tokio tasks per work queue. Each task pulls jobs
//! one at a time and executes them under the job's maximum execution time.
//! A janitor task drops jobs whose result TTL has run out.

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, Duration};

use surveyor_core::Job;
use surveyor_store::{JobQueue, StoreError};

use crate::job::ScanJobExecutor;
use crate::runner::panic_text;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Running workers for a set of queues. Dropping the pool leaves them running;
/// call [`WorkerPool::shutdown`] to stop them.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers_per_queue` workers on each of `queues`.
    pub fn start(
        queue: Arc<dyn JobQueue>,
        executor: Arc<ScanJobExecutor>,
        queues: &[String],
        workers_per_queue: usize,
    ) -> Self {
        let mut handles = Vec::new();

        for name in queues {
            for worker in 0..workers_per_queue {
                let queue = queue.clone();
                let executor = executor.clone();
                let name = name.clone();
                handles.push(tokio::spawn(async move {
                    run_worker(queue, executor, name, worker).await;
                }));
            }
        }

        let janitor = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                janitor.purge_expired().await;
            }
        }));

        tracing::info!(
            queue_count = queues.len(),
            workers_per_queue,
            "Worker pool started"
        );
        Self { handles }
    }

    /// Abort every worker. Jobs in flight are left as they are.
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Worker task panicked");
                }
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

/// Per-queue worker loop.
async fn run_worker(
    queue: Arc<dyn JobQueue>,
    executor: Arc<ScanJobExecutor>,
    name: String,
    worker: usize,
) {
    tracing::debug!(queue = %name, worker, "Worker started");
    loop {
        let job = match queue.dequeue(&name).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(queue = %name, worker, error = %e, "Dequeue failed, stopping worker");
                return;
            }
        };
        process_job(queue.as_ref(), executor.clone(), job).await;
    }
}

/// Execute one dequeued job and record how it ended.
///
/// The job runs on its own task: a panic marks it failed, and on timeout the
/// task is aborted and the job is marked failed with the progress persisted
/// so far.
pub async fn process_job(queue: &dyn JobQueue, executor: Arc<ScanJobExecutor>, job: Job) {
    let job_id = job.id;
    let limit = job.timeout;
    tracing::info!(job_id = %job_id, queue = %job.queue, address = ?job.payload.address, "Job started");

    let mut task = JoinSet::new();
    task.spawn(async move { executor.execute(&job).await });

    let recorded = match timeout(limit, task.join_next()).await {
        Ok(Some(Ok(Ok(results)))) => {
            tracing::info!(job_id = %job_id, plugins = results.len(), "Job finished");
            queue.finish(job_id, results).await
        }
        Ok(Some(Ok(Err(e)))) => {
            tracing::error!(job_id = %job_id, error = %e, "Job failed");
            queue.fail(job_id, &e.to_string()).await
        }
        Ok(Some(Err(e))) => {
            let reason = if e.is_panic() {
                panic_text(e.into_panic())
            } else {
                e.to_string()
            };
            tracing::error!(job_id = %job_id, error = %reason, "Job task aborted");
            queue.fail(job_id, &reason).await
        }
        Ok(None) => queue.fail(job_id, "Job task vanished.").await,
        Err(_elapsed) => {
            task.abort_all();
            let reason = format!(
                "Job exceeded maximum execution time of {}s.",
                limit.as_secs()
            );
            tracing::warn!(job_id = %job_id, timeout_secs = limit.as_secs(), "Job timed out");
            queue.fail(job_id, &reason).await
        }
    };

    match recorded {
        Ok(()) => {}
        Err(StoreError::JobNotFound(_)) => {
            tracing::debug!(job_id = %job_id, "Job was superseded before it ended");
        }
        Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Failed to record job outcome"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use surveyor_core::{JobState, PluginResult, ScanPayload};
    use surveyor_store::{MemoryInventory, MemoryJobQueue};

    use super::*;
    use crate::plugin::{Plugin, PluginOptions, PluginOutcome, PluginRegistry, ScanTarget};
    use crate::postprocess::Postprocessor;
    use crate::runner::PluginRunner;

    struct Slow;

    #[async_trait]
    impl Plugin for Slow {
        fn id(&self) -> &str {
            "slow"
        }

        async fn scan_address(&self, _: &ScanTarget, _: &PluginOptions) -> PluginOutcome {
            tokio::time::sleep(Duration::from_secs(30)).await;
            PluginOutcome::Failed("unreachable".to_string())
        }
    }

    struct Quick;

    #[async_trait]
    impl Plugin for Quick {
        fn id(&self) -> &str {
            "quick"
        }

        async fn scan_address(&self, _: &ScanTarget, _: &PluginOptions) -> PluginOutcome {
            PluginOutcome::Completed(PluginResult::default())
        }
    }

    fn executor(queue: Arc<MemoryJobQueue>) -> Arc<ScanJobExecutor> {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(Slow));
        registry.register(Arc::new(Quick));
        let runner = PluginRunner::new(Arc::new(registry), HashMap::new(), queue.clone());
        let post = Postprocessor::new(Arc::new(MemoryInventory::new()), queue);
        Arc::new(ScanJobExecutor::new(
            runner,
            post,
            vec!["quick".to_string(), "slow".to_string()],
        ))
    }

    fn payload(plugins: &[&str]) -> ScanPayload {
        ScanPayload {
            address: Some("10.0.0.1".parse().unwrap()),
            plugins: plugins.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_workers_finish_jobs() {
        let queue = Arc::new(MemoryJobQueue::new());
        let pool = WorkerPool::start(
            queue.clone(),
            executor(queue.clone()),
            &["q".to_string()],
            2,
        );

        let handle = queue
            .enqueue(
                "q",
                payload(&["quick"]),
                Duration::from_secs(5),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        queue.wait_idle().await;

        let job = queue.fetch(handle.id).await.unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert!(job.result.unwrap().contains_key("quick"));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_timed_out_job_keeps_its_progress() {
        let queue = Arc::new(MemoryJobQueue::new());
        let pool = WorkerPool::start(
            queue.clone(),
            executor(queue.clone()),
            &["q".to_string()],
            1,
        );

        let handle = queue
            .enqueue(
                "q",
                payload(&["quick", "slow"]),
                Duration::from_millis(200),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        queue.wait_idle().await;

        let job = queue.fetch(handle.id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.failure.unwrap().contains("maximum execution time"));
        assert!(job.progress.is_finished("quick"));
        assert!(!job.progress.is_finished("slow"));
        assert_eq!(
            job.progress.messages.last().map(|m| m.text.as_str()),
            Some("Running plugin slow.")
        );
        pool.shutdown().await;
    }
}

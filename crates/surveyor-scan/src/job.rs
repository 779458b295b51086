//! The work a queue worker performs for one scan job.

use std::sync::Arc;

use surveyor_core::{Job, ScanResults};

use crate::error::Result;
use crate::plugin::ScanTarget;
use crate::postprocess::Postprocessor;
use crate::runner::PluginRunner;

pub struct ScanJobExecutor {
    runner: PluginRunner,
    postprocessor: Postprocessor,
    /// The full configured plugin set, in execution order.
    plugins: Vec<String>,
}

impl ScanJobExecutor {
    pub fn new(runner: PluginRunner, postprocessor: Postprocessor, plugins: Vec<String>) -> Self {
        Self {
            runner,
            postprocessor,
            plugins,
        }
    }

    /// Execute `job` and return its result payload.
    ///
    /// Only runs that cover every configured plugin are postprocessed; their
    /// payload is the merged result. Partial runs return the runner's
    /// results untouched.
    pub async fn execute(&self, job: &Job) -> Result<ScanResults> {
        let payload = &job.payload;
        let requested: &[String] = if payload.plugins.is_empty() {
            &self.plugins
        } else {
            &payload.plugins
        };
        let run_postprocessing = self.plugins.iter().all(|p| requested.contains(p));

        let results = match payload.address {
            Some(ip) if !requested.is_empty() => {
                let target = ScanTarget {
                    ip,
                    credentials: payload.credentials.clone(),
                };
                self.runner.run(job.id, &target, requested).await
            }
            _ => payload.results.clone().unwrap_or_default(),
        };

        if !run_postprocessing {
            tracing::debug!(job_id = %job.id, "Partial plugin set, skipping postprocessing");
            return Ok(results);
        }

        match self
            .postprocessor
            .postprocess(results.clone(), job.id, payload.address)
            .await?
        {
            Some(outcome) => Ok(outcome.results),
            None => Ok(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use surveyor_core::{Address, DeviceFacts, PluginResult, ScanPayload};
    use surveyor_store::{Inventory, JobQueue, MemoryInventory, MemoryJobQueue};

    use super::*;
    use crate::plugin::{Plugin, PluginOptions, PluginOutcome, PluginRegistry};

    struct Fixed(&'static str);

    #[async_trait]
    impl Plugin for Fixed {
        fn id(&self) -> &str {
            self.0
        }

        async fn scan_address(&self, target: &ScanTarget, _: &PluginOptions) -> PluginOutcome {
            PluginOutcome::Completed(PluginResult::success(
                self.0,
                DeviceFacts {
                    system_ip_addresses: vec![target.ip.to_string()],
                    ..Default::default()
                },
            ))
        }
    }

    struct Setup {
        inventory: Arc<MemoryInventory>,
        queue: Arc<MemoryJobQueue>,
        executor: ScanJobExecutor,
    }

    fn setup() -> Setup {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(Fixed("a")));
        registry.register(Arc::new(Fixed("b")));
        let inventory = Arc::new(MemoryInventory::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let runner = PluginRunner::new(Arc::new(registry), HashMap::new(), queue.clone());
        let post = Postprocessor::new(inventory.clone(), queue.clone());
        let executor = ScanJobExecutor::new(runner, post, vec!["a".into(), "b".into()]);
        Setup {
            inventory,
            queue,
            executor,
        }
    }

    async fn enqueue(queue: &MemoryJobQueue, payload: ScanPayload) -> Job {
        let handle = queue
            .enqueue("q", payload, Duration::from_secs(30), Duration::from_secs(60))
            .await
            .unwrap();
        queue.fetch(handle.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_empty_plugin_set_runs_everything_and_postprocesses() {
        let s = setup();
        s.inventory
            .insert_address(Address::new("10.0.0.1".parse().unwrap()))
            .await;
        let job = enqueue(
            &s.queue,
            ScanPayload {
                address: Some("10.0.0.1".parse().unwrap()),
                ..Default::default()
            },
        )
        .await;

        let results = s.executor.execute(&job).await.unwrap();
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["a", "b"]);

        let progress = s.queue.fetch(job.id).await.unwrap().progress;
        assert!(progress.results_checksum.is_some());
        let address = s
            .inventory
            .address("10.0.0.1".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(address.scan_summary.is_some());
    }

    #[tokio::test]
    async fn test_partial_plugin_set_skips_postprocessing() {
        let s = setup();
        let job = enqueue(
            &s.queue,
            ScanPayload {
                address: Some("10.0.0.1".parse().unwrap()),
                plugins: vec!["a".into()],
                ..Default::default()
            },
        )
        .await;

        let results = s.executor.execute(&job).await.unwrap();
        assert_eq!(results.len(), 1);

        let progress = s.queue.fetch(job.id).await.unwrap().progress;
        assert!(progress.results_checksum.is_none());
        assert_eq!(s.inventory.address_count().await, 0);
    }

    #[tokio::test]
    async fn test_submitted_results_skip_the_runner() {
        let s = setup();
        let mut submitted = ScanResults::new();
        submitted.insert(
            "a".to_string(),
            PluginResult::success(
                "a",
                DeviceFacts {
                    system_ip_addresses: vec!["10.0.0.7".into()],
                    ..Default::default()
                },
            ),
        );
        let job = enqueue(
            &s.queue,
            ScanPayload {
                results: Some(submitted.clone()),
                ..Default::default()
            },
        )
        .await;

        let results = s.executor.execute(&job).await.unwrap();
        assert_eq!(results, submitted);

        let progress = s.queue.fetch(job.id).await.unwrap().progress;
        assert!(progress.messages.is_empty());
        assert_eq!(progress.changed, Some(true));
        assert!(s
            .inventory
            .address("10.0.0.7".parse().unwrap())
            .await
            .unwrap()
            .is_some());
    }
}

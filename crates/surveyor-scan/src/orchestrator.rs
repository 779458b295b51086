//! Wiring of the dispatcher, the job executor, and the worker pool over one
//! inventory and job queue.

use std::sync::Arc;

use surveyor_store::{Inventory, JobQueue};

use crate::config::ScanConfig;
use crate::dispatcher::Dispatcher;
use crate::job::ScanJobExecutor;
use crate::plugin::PluginRegistry;
use crate::postprocess::Postprocessor;
use crate::runner::PluginRunner;
use crate::worker::WorkerPool;

pub struct Orchestrator {
    dispatcher: Dispatcher,
    executor: Arc<ScanJobExecutor>,
    queue: Arc<dyn JobQueue>,
    workers_per_queue: usize,
}

impl Orchestrator {
    pub fn new(
        config: &ScanConfig,
        registry: PluginRegistry,
        inventory: Arc<dyn Inventory>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        for id in config.plugin_ids() {
            if registry.get(&id).is_none() {
                tracing::warn!(plugin = %id, "Configured plugin is not registered");
            }
        }

        let runner = PluginRunner::new(Arc::new(registry), config.plugin_options(), queue.clone());
        let postprocessor = Postprocessor::new(inventory.clone(), queue.clone());
        let executor = Arc::new(ScanJobExecutor::new(
            runner,
            postprocessor,
            config.plugin_ids(),
        ));
        let dispatcher = Dispatcher::new(inventory, queue.clone(), config);

        Self {
            dispatcher,
            executor,
            queue,
            workers_per_queue: config.workers_per_queue,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Start the configured number of workers on each of `queues`.
    pub fn start_workers(&self, queues: &[String]) -> WorkerPool {
        WorkerPool::start(
            self.queue.clone(),
            self.executor.clone(),
            queues,
            self.workers_per_queue.max(1),
        )
    }
}

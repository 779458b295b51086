//! Sequential plugin execution against one address.
//!
//! Each plugin runs on its own task so that a panic is contained to that
//! plugin. Progress is persisted before and after every plugin; a failed
//! progress write is logged and the run goes on.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use surveyor_core::job::{ProgressMessage, Severity};
use surveyor_core::{JobId, PluginResult, PluginStatus, ProgressUpdate, ScanResults};
use surveyor_store::JobQueue;

use crate::plugin::{PluginOptions, PluginOutcome, PluginRegistry, ScanTarget};

pub struct PluginRunner {
    registry: Arc<PluginRegistry>,
    options: HashMap<String, PluginOptions>,
    queue: Arc<dyn JobQueue>,
}

impl PluginRunner {
    pub fn new(
        registry: Arc<PluginRegistry>,
        options: HashMap<String, PluginOptions>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            registry,
            options,
            queue,
        }
    }

    /// Run `plugins` in order against `target`, recording progress on `job_id`.
    ///
    /// Unknown plugins get an error status and no result entry. Every other
    /// plugin gets a result entry, synthesised as an error when the plugin
    /// failed or panicked.
    pub async fn run(&self, job_id: JobId, target: &ScanTarget, plugins: &[String]) -> ScanResults {
        let mut results = ScanResults::new();

        for id in plugins {
            self.record(
                job_id,
                ProgressUpdate::Message(ProgressMessage::new(
                    target.ip,
                    id,
                    Severity::Info,
                    format!("Running plugin {id}."),
                )),
            )
            .await;

            let Some(plugin) = self.registry.get(id) else {
                tracing::warn!(job_id = %job_id, plugin = %id, "Plugin not registered");
                self.record(
                    job_id,
                    ProgressUpdate::PluginFinished {
                        plugin: id.clone(),
                        status: PluginStatus::Error,
                        messages: vec![ProgressMessage::new(
                            target.ip,
                            id,
                            Severity::Error,
                            format!("Failed to load plugin {id}: not registered."),
                        )],
                    },
                )
                .await;
                continue;
            };

            let options = self.options.get(id).cloned().unwrap_or_default();
            let task_target = target.clone();
            let mut task = JoinSet::new();
            task.spawn(async move { plugin.scan_address(&task_target, &options).await });

            let result = match task.join_next().await {
                Some(Ok(outcome)) => outcome_result(id, outcome),
                Some(Err(e)) if e.is_panic() => {
                    let diagnostic =
                        format!("Exception occurred in plugin {id} and address {}", target.ip);
                    let detail = panic_text(e.into_panic());
                    tracing::error!(
                        job_id = %job_id,
                        address = %target.ip,
                        plugin = %id,
                        panic = %detail,
                        "{diagnostic}"
                    );
                    PluginResult::error(id, vec![diagnostic, detail])
                }
                Some(Err(e)) => PluginResult::error(id, vec![e.to_string()]),
                None => PluginResult::error(id, vec!["Plugin task vanished.".to_string()]),
            };

            tracing::debug!(
                job_id = %job_id,
                address = %target.ip,
                plugin = %id,
                status = %result.status,
                "Plugin finished"
            );
            self.record(
                job_id,
                ProgressUpdate::PluginFinished {
                    plugin: id.clone(),
                    status: result.status,
                    messages: result
                        .messages
                        .iter()
                        .map(|m| ProgressMessage::new(target.ip, id, Severity::Warning, m.clone()))
                        .collect(),
                },
            )
            .await;
            results.insert(id.clone(), result);
        }

        results
    }

    async fn record(&self, job_id: JobId, update: ProgressUpdate) {
        if let Err(e) = self.queue.update_progress(job_id, update).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to persist job progress");
        }
    }
}

fn outcome_result(plugin: &str, outcome: PluginOutcome) -> PluginResult {
    match outcome {
        PluginOutcome::Completed(mut result) => {
            if result.plugin.is_none() {
                result.plugin = Some(plugin.to_string());
            }
            result
        }
        PluginOutcome::Failed(reason) | PluginOutcome::NotConfigured(reason) => {
            PluginResult::error(plugin, vec![reason])
        }
    }
}

pub(crate) fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

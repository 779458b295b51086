//! Routing of scan requests onto per-network work queues.
//!
//! The dispatcher never waits for a scan; it returns a [`JobHandle`] the
//! caller can poll through the job queue.

use std::sync::Arc;
use std::time::Duration;

use surveyor_core::{Address, JobHandle, Network, ScanPayload, ScanResults};
use surveyor_store::{Inventory, JobQueue};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};

pub struct Dispatcher {
    inventory: Arc<dyn Inventory>,
    queue: Arc<dyn JobQueue>,
    timeout: Duration,
    result_ttl: Duration,
    dead_ping_threshold: u32,
}

impl Dispatcher {
    pub fn new(inventory: Arc<dyn Inventory>, queue: Arc<dyn JobQueue>, config: &ScanConfig) -> Self {
        Self {
            inventory,
            queue,
            timeout: config.job_timeout(),
            result_ttl: config.result_ttl(),
            dead_ping_threshold: config.dead_ping_threshold,
        }
    }

    /// Queue a scan of `address` on the queue of `network`, or of the most
    /// specific network containing it. An empty plugin set means every
    /// configured plugin.
    pub async fn dispatch(
        &self,
        address: &Address,
        plugins: &[String],
        network: Option<&Network>,
    ) -> Result<JobHandle> {
        let resolved;
        let network = match network {
            Some(network) => network,
            None => {
                resolved = self
                    .inventory
                    .network_for_ip(address.ip)
                    .await?
                    .ok_or_else(|| {
                        ScanError::NoQueue(format!(
                            "Address {} doesn't belong to any configured network.",
                            address.ip
                        ))
                    })?;
                &resolved
            }
        };
        let queue = queue_of(network)?;

        let payload = ScanPayload {
            address: Some(address.ip),
            plugins: plugins.to_vec(),
            credentials: address.credentials(),
            results: None,
        };
        let handle = self
            .queue
            .enqueue(queue, payload, self.timeout, self.result_ttl)
            .await?;

        tracing::info!(
            job_id = %handle.id,
            address = %address.ip,
            queue = %queue,
            "Scan dispatched"
        );
        Ok(handle)
    }

    /// Queue scans of every live, known host address of `network`.
    pub async fn dispatch_network(
        &self,
        network: &Network,
        plugins: &[String],
    ) -> Result<Vec<JobHandle>> {
        queue_of(network)?;

        let mut handles = Vec::new();
        for address in self.inventory.addresses_in(network.range).await? {
            if !network.is_host(&address.ip) {
                tracing::debug!(address = %address.ip, network = %network.name, "Skipping non-host address");
                continue;
            }
            if address.dead_ping_count > self.dead_ping_threshold {
                tracing::debug!(
                    address = %address.ip,
                    dead_ping_count = address.dead_ping_count,
                    "Skipping dead address"
                );
                continue;
            }
            handles.push(self.dispatch(&address, plugins, Some(network)).await?);
        }

        tracing::info!(network = %network, jobs = handles.len(), "Network scan dispatched");
        Ok(handles)
    }

    /// Queue scans of every network of the data center that has a queue.
    pub async fn dispatch_data_center(
        &self,
        name: &str,
        plugins: &[String],
    ) -> Result<Vec<JobHandle>> {
        let mut handles = Vec::new();
        for network in self.inventory.networks_in_data_center(name).await? {
            if network.queue.is_none() {
                continue;
            }
            handles.extend(self.dispatch_network(&network, plugins).await?);
        }
        Ok(handles)
    }

    /// Queue scans of every network assigned to the named queue.
    pub async fn dispatch_queue(&self, name: &str, plugins: &[String]) -> Result<Vec<JobHandle>> {
        let mut handles = Vec::new();
        for network in self.inventory.networks_for_queue(name).await? {
            handles.extend(self.dispatch_network(&network, plugins).await?);
        }
        Ok(handles)
    }

    /// Queue externally gathered results for postprocessing. The job runs no
    /// plugins and is attributed by the reported system addresses.
    pub async fn submit_results(&self, queue: &str, results: ScanResults) -> Result<JobHandle> {
        if !self.inventory.queue_exists(queue).await? {
            return Err(ScanError::NoQueue(format!("Unknown queue {queue}.")));
        }
        let payload = ScanPayload {
            results: Some(results),
            ..Default::default()
        };
        let handle = self
            .queue
            .enqueue(queue, payload, self.timeout, self.result_ttl)
            .await?;
        tracing::info!(job_id = %handle.id, queue = %queue, "Results submitted");
        Ok(handle)
    }
}

fn queue_of(network: &Network) -> Result<&str> {
    network
        .queue
        .as_deref()
        .ok_or_else(|| ScanError::NoQueue(format!("The network {network} has no discovery queue.")))
}

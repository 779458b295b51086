//! Asset inventory: addresses, networks, data centers, and scan summaries.
//!
//! The orchestrator only reads networks and data centers; it creates and
//! updates addresses and scan summaries during postprocessing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::sync::RwLock;

use surveyor_core::{Address, DataCenter, JobId, Network, ScanSummary, ScanSummaryId};

use crate::error::{Result, StoreError};

/// Read/write access to the inventory records the orchestrator needs.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Look up an address record.
    async fn address(&self, ip: IpAddr) -> Result<Option<Address>>;

    /// Look up an address record, creating an empty one if absent.
    async fn get_or_create_address(&self, ip: IpAddr) -> Result<Address>;

    async fn save_address(&self, address: &Address) -> Result<()>;

    /// Address records inside `range`, in ascending order.
    async fn addresses_in(&self, range: IpNet) -> Result<Vec<Address>>;

    /// The most specific network containing `ip`.
    async fn network_for_ip(&self, ip: IpAddr) -> Result<Option<Network>>;

    /// Find a network by name or by its CIDR text.
    async fn find_network(&self, spec: &str) -> Result<Network>;

    async fn data_center(&self, name: &str) -> Result<DataCenter>;

    async fn networks_in_data_center(&self, name: &str) -> Result<Vec<Network>>;

    /// Networks scanned by the named queue.
    async fn networks_for_queue(&self, queue: &str) -> Result<Vec<Network>>;

    async fn queue_exists(&self, queue: &str) -> Result<bool>;

    async fn scan_summary(&self, id: ScanSummaryId) -> Result<Option<ScanSummary>>;

    async fn create_scan_summary(&self, job_id: JobId) -> Result<ScanSummary>;

    async fn save_scan_summary(&self, summary: &ScanSummary) -> Result<()>;
}

#[derive(Debug, Default)]
struct InventoryState {
    addresses: BTreeMap<IpAddr, Address>,
    networks: BTreeMap<String, Network>,
    data_centers: BTreeMap<String, DataCenter>,
    queues: BTreeSet<String>,
    summaries: HashMap<ScanSummaryId, ScanSummary>,
}

/// In-memory inventory, seeded at startup.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    state: RwLock<InventoryState>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_data_center(&self, data_center: DataCenter) {
        let mut state = self.state.write().await;
        state
            .data_centers
            .insert(data_center.name.clone(), data_center);
    }

    pub async fn insert_queue(&self, name: &str) {
        self.state.write().await.queues.insert(name.to_string());
    }

    /// Add a network. Its queue is registered implicitly; its data center
    /// must already exist.
    pub async fn insert_network(&self, network: Network) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(dc) = &network.data_center {
            if !state.data_centers.contains_key(dc) {
                return Err(StoreError::Invalid(format!(
                    "network {} references unknown data center {dc}",
                    network.name
                )));
            }
        }
        if let Some(queue) = &network.queue {
            state.queues.insert(queue.clone());
        }
        state.networks.insert(network.name.clone(), network);
        Ok(())
    }

    pub async fn insert_address(&self, address: Address) {
        let mut state = self.state.write().await;
        state.addresses.insert(address.ip, address);
    }

    pub async fn address_count(&self) -> usize {
        self.state.read().await.addresses.len()
    }
}

#[async_trait]
impl Inventory for MemoryInventory {
    async fn address(&self, ip: IpAddr) -> Result<Option<Address>> {
        Ok(self.state.read().await.addresses.get(&ip).cloned())
    }

    async fn get_or_create_address(&self, ip: IpAddr) -> Result<Address> {
        let mut state = self.state.write().await;
        let address = state.addresses.entry(ip).or_insert_with(|| {
            tracing::debug!(address = %ip, "Creating address record");
            Address::new(ip)
        });
        Ok(address.clone())
    }

    async fn save_address(&self, address: &Address) -> Result<()> {
        let mut state = self.state.write().await;
        state.addresses.insert(address.ip, address.clone());
        Ok(())
    }

    async fn addresses_in(&self, range: IpNet) -> Result<Vec<Address>> {
        let state = self.state.read().await;
        Ok(state
            .addresses
            .values()
            .filter(|a| range.contains(&a.ip))
            .cloned()
            .collect())
    }

    async fn network_for_ip(&self, ip: IpAddr) -> Result<Option<Network>> {
        let state = self.state.read().await;
        Ok(state
            .networks
            .values()
            .filter(|net| net.contains(&ip))
            .max_by_key(|net| net.range.prefix_len())
            .cloned())
    }

    async fn find_network(&self, spec: &str) -> Result<Network> {
        let state = self.state.read().await;
        if let Some(network) = state.networks.get(spec) {
            return Ok(network.clone());
        }
        if let Ok(range) = spec.parse::<IpNet>() {
            let range = range.trunc();
            if let Some(network) = state.networks.values().find(|n| n.range.trunc() == range) {
                return Ok(network.clone());
            }
        }
        Err(StoreError::NetworkNotFound(spec.to_string()))
    }

    async fn data_center(&self, name: &str) -> Result<DataCenter> {
        self.state
            .read()
            .await
            .data_centers
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::DataCenterNotFound(name.to_string()))
    }

    async fn networks_in_data_center(&self, name: &str) -> Result<Vec<Network>> {
        let state = self.state.read().await;
        if !state.data_centers.contains_key(name) {
            return Err(StoreError::DataCenterNotFound(name.to_string()));
        }
        Ok(state
            .networks
            .values()
            .filter(|n| n.data_center.as_deref() == Some(name))
            .cloned()
            .collect())
    }

    async fn networks_for_queue(&self, queue: &str) -> Result<Vec<Network>> {
        let state = self.state.read().await;
        if !state.queues.contains(queue) {
            return Err(StoreError::QueueNotFound(queue.to_string()));
        }
        Ok(state
            .networks
            .values()
            .filter(|n| n.queue.as_deref() == Some(queue))
            .cloned()
            .collect())
    }

    async fn queue_exists(&self, queue: &str) -> Result<bool> {
        Ok(self.state.read().await.queues.contains(queue))
    }

    async fn scan_summary(&self, id: ScanSummaryId) -> Result<Option<ScanSummary>> {
        Ok(self.state.read().await.summaries.get(&id).cloned())
    }

    async fn create_scan_summary(&self, job_id: JobId) -> Result<ScanSummary> {
        let summary = ScanSummary::new(job_id);
        let mut state = self.state.write().await;
        state.summaries.insert(summary.id, summary.clone());
        Ok(summary)
    }

    async fn save_scan_summary(&self, summary: &ScanSummary) -> Result<()> {
        let mut state = self.state.write().await;
        state.summaries.insert(summary.id, summary.clone());
        Ok(())
    }
}

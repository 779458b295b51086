//! Configuration for the surveyor-scan orchestrator.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Deserialize;
use surveyor_core::{Address, DataCenter, Network};
use surveyor_store::MemoryInventory;

use crate::error::{Result, ScanError};
use crate::plugin::PluginOptions;

/// Top-level scan configuration.
///
/// Loaded from the `[scan]` section of `surveyor.toml` or
/// `SURVEYOR_SCAN__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// The full plugin set, in execution order. Only scans covering all of
    /// these are checksummed.
    #[serde(default = "default_plugins")]
    pub plugins: Vec<PluginConfig>,

    /// Addresses with more failed pings than this are skipped by batch scans.
    #[serde(default = "default_dead_ping_threshold")]
    pub dead_ping_threshold: u32,

    /// Maximum execution time of one job.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// How long a finished job's result stays fetchable.
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,

    /// Worker tasks consuming each queue.
    #[serde(default = "default_workers")]
    pub workers_per_queue: usize,

    /// Records loaded into the in-memory inventory at startup.
    #[serde(default)]
    pub inventory: InventorySeed,
}

/// One configured plugin and its options.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PluginConfig {
    pub id: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventorySeed {
    #[serde(default)]
    pub data_centers: Vec<String>,
    /// Queues with no network yet; queues named by networks need not be listed.
    #[serde(default)]
    pub queues: Vec<String>,
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

fn default_plugins() -> Vec<PluginConfig> {
    vec![PluginConfig {
        id: crate::plugins::tcp_ports::PLUGIN_ID.to_string(),
        options: BTreeMap::new(),
    }]
}

fn default_dead_ping_threshold() -> u32 {
    2
}

fn default_job_timeout() -> u64 {
    300
}

fn default_result_ttl() -> u64 {
    86_400
}

fn default_workers() -> usize {
    4
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            plugins: default_plugins(),
            dead_ping_threshold: default_dead_ping_threshold(),
            job_timeout_secs: default_job_timeout(),
            result_ttl_secs: default_result_ttl(),
            workers_per_queue: default_workers(),
            inventory: InventorySeed::default(),
        }
    }
}

impl ScanConfig {
    /// Load the `[scan]` section from `{file_prefix}.toml` and the
    /// environment. A missing section yields the defaults.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("SURVEYOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ScanError::Config(e.to_string()))?;

        match cfg.get::<ScanConfig>("scan") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(ScanConfig::default()),
            Err(e) => Err(ScanError::Config(e.to_string())),
        }
    }

    /// Ids of the full plugin set, in execution order.
    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.id.clone()).collect()
    }

    /// Per-plugin options keyed by plugin id.
    pub fn plugin_options(&self) -> HashMap<String, PluginOptions> {
        self.plugins
            .iter()
            .map(|p| (p.id.clone(), p.options.clone()))
            .collect()
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    /// Load the configured inventory records into `inventory`.
    pub async fn seed(&self, inventory: &MemoryInventory) -> Result<()> {
        let seed = &self.inventory;
        for name in &seed.data_centers {
            inventory
                .insert_data_center(DataCenter { name: name.clone() })
                .await;
        }
        for queue in &seed.queues {
            inventory.insert_queue(queue).await;
        }
        for network in &seed.networks {
            inventory.insert_network(network.clone()).await?;
        }
        for address in &seed.addresses {
            inventory.insert_address(address.clone()).await;
        }

        tracing::info!(
            data_centers = seed.data_centers.len(),
            networks = seed.networks.len(),
            addresses = seed.addresses.len(),
            "Inventory seeded"
        );
        Ok(())
    }

    /// All queue names the seeded inventory references.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inventory
            .networks
            .iter()
            .filter_map(|n| n.queue.clone())
            .chain(self.inventory.queues.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

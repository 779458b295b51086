//! Probe plugin contract and registry.
//!
//! A plugin interrogates one address and reports a [`PluginResult`].
//! Expected failures come back as [`PluginOutcome::Failed`] or
//! [`PluginOutcome::NotConfigured`]; a panic is treated as an unexpected
//! fault and caught by the runner.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use surveyor_core::{Credentials, PluginResult};

/// Options from a plugin's configuration section.
pub type PluginOptions = BTreeMap<String, String>;

/// The address a plugin probes, with its protocol hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub ip: IpAddr,
    pub credentials: Credentials,
}

/// What a plugin invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginOutcome {
    /// The plugin ran; its result carries its own declared status.
    Completed(PluginResult),
    /// The probe failed, e.g. the device refused the connection.
    Failed(String),
    /// Required options are missing.
    NotConfigured(String),
}

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable registry identifier.
    fn id(&self) -> &str;

    async fn scan_address(&self, target: &ScanTarget, options: &PluginOptions) -> PluginOutcome;
}

/// Plugins available to the runner, keyed by id. Built once at startup.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the plugins shipped with this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::plugins::tcp_ports::TcpPortsPlugin::default()));
        registry
    }

    /// Add a plugin, replacing any previous one with the same id.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let id = plugin.id().to_string();
        if self.plugins.insert(id.clone(), plugin).is_some() {
            tracing::warn!(plugin = %id, "Replacing registered plugin");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plugins.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.ids())
            .finish()
    }
}

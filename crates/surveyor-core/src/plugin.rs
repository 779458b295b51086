//! Plugin result payloads.
//!
//! A plugin reports a JSON object with a handful of well-known keys
//! (`status`, `date`, `plugin`, `messages`, `device`) and any number of
//! plugin-specific keys, which are kept verbatim in `extra`.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Results of one job: plugin id → that plugin's result.
pub type ScanResults = BTreeMap<String, PluginResult>;

/// Terminal status a plugin reports for one address.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    #[default]
    Success,
    Error,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Structured facts about the probed device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceFacts {
    /// Addresses the device reports as its own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_ip_addresses: Vec<String>,
    #[serde(flatten)]
    pub facts: Map<String, Value>,
}

/// What a plugin returned for one address.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PluginResult {
    #[serde(default)]
    pub status: PluginStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceFacts>,
    /// Plugin-specific keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginResult {
    /// A successful result carrying device facts.
    pub fn success(plugin: &str, device: DeviceFacts) -> Self {
        Self {
            status: PluginStatus::Success,
            date: Some(Utc::now()),
            plugin: Some(plugin.to_string()),
            device: Some(device),
            ..Default::default()
        }
    }

    /// An error result stamped with the current time.
    pub fn error(plugin: &str, messages: Vec<String>) -> Self {
        Self {
            status: PluginStatus::Error,
            date: Some(Utc::now()),
            plugin: Some(plugin.to_string()),
            messages,
            ..Default::default()
        }
    }

    /// Reported system addresses that parse as ip addresses.
    pub fn system_ip_addresses(&self) -> Vec<IpAddr> {
        let Some(device) = &self.device else {
            return Vec::new();
        };
        device
            .system_ip_addresses
            .iter()
            .filter_map(|raw| match raw.trim().parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!(address = %raw, "Ignoring unparseable system ip address");
                    None
                }
            })
            .collect()
    }
}

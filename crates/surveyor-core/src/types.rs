//! Inventory records the scan orchestrator reads and updates.
//!
//! These mirror the asset store: addresses, the networks and data centers
//! they live in, and the per-address scan summary used for change detection.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobId;

// ── Address ───────────────────────────────────────────────────────

/// A network-reachable scan target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    pub ip: IpAddr,
    #[serde(default)]
    pub snmp_community: Option<String>,
    #[serde(default)]
    pub snmp_version: Option<String>,
    #[serde(default)]
    pub http_family: Option<String>,
    #[serde(default)]
    pub snmp_name: Option<String>,
    /// Consecutive failed reachability checks.
    #[serde(default)]
    pub dead_ping_count: u32,
    #[serde(default)]
    pub scan_summary: Option<ScanSummaryId>,
}

impl Address {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            snmp_community: None,
            snmp_version: None,
            http_family: None,
            snmp_name: None,
            dead_ping_count: 0,
            scan_summary: None,
        }
    }

    /// Protocol hints handed to every plugin scanning this address.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            snmp_community: self.snmp_community.clone(),
            snmp_version: self.snmp_version.clone(),
            http_family: self.http_family.clone(),
            snmp_name: self.snmp_name.clone(),
        }
    }
}

/// Per-protocol credentials and hints derived from an [`Address`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub snmp_community: Option<String>,
    pub snmp_version: Option<String>,
    pub http_family: Option<String>,
    pub snmp_name: Option<String>,
}

// ── Network ───────────────────────────────────────────────────────

/// An address range, optionally owning a named work queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub range: IpNet,
    /// Name of the work queue that scans this network.
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub data_center: Option<String>,
}

impl Network {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.range.contains(ip)
    }

    /// Whether `ip` is a usable host address of the range. IPv4 ranges
    /// shorter than /31 exclude their network and broadcast addresses.
    pub fn is_host(&self, ip: &IpAddr) -> bool {
        if !self.contains(ip) {
            return false;
        }
        match self.range {
            IpNet::V4(net) if net.prefix_len() < 31 => {
                *ip != IpAddr::V4(net.network()) && *ip != IpAddr::V4(net.broadcast())
            }
            _ => true,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.range)
    }
}

/// A data center grouping networks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataCenter {
    pub name: String,
}

// ── Scan Summary ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScanSummaryId(pub Uuid);

impl ScanSummaryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScanSummaryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScanSummaryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-address change-detection state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanSummary {
    pub id: ScanSummaryId,
    /// The job of record: most recent completed or in-flight job.
    pub job_id: JobId,
    /// Checksum of the last accepted run.
    pub previous_checksum: Option<String>,
    /// Checksum flagged as a change that should be suppressed once.
    pub false_positive_checksum: Option<String>,
}

impl ScanSummary {
    pub fn new(job_id: JobId) -> Self {
        Self {
            id: ScanSummaryId::new(),
            job_id,
            previous_checksum: None,
            false_positive_checksum: None,
        }
    }
}

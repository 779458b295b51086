//! TCP connect probe.
//!
//! Tries a connect to each configured port and reports which ones accepted.
//! Options:
//! - `ports`: comma separated list (default `22,23,80,443`)
//! - `connect_timeout_ms`: per-port connect timeout (default 500)

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map};
use tokio::net::TcpStream;
use tokio::time::timeout;

use surveyor_core::{DeviceFacts, PluginResult};

use crate::plugin::{Plugin, PluginOptions, PluginOutcome, ScanTarget};

pub const PLUGIN_ID: &str = "tcp_ports";

const DEFAULT_PORTS: &[u16] = &[22, 23, 80, 443];
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Default)]
pub struct TcpPortsPlugin;

fn ports(options: &PluginOptions) -> Result<Vec<u16>, String> {
    let Some(raw) = options.get("ports") else {
        return Ok(DEFAULT_PORTS.to_vec());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u16>().map_err(|_| format!("Invalid port: {s}")))
        .collect()
}

fn connect_timeout(options: &PluginOptions) -> Result<Duration, String> {
    match options.get("connect_timeout_ms") {
        None => Ok(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| format!("Invalid connect_timeout_ms: {raw}")),
    }
}

#[async_trait]
impl Plugin for TcpPortsPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    async fn scan_address(&self, target: &ScanTarget, options: &PluginOptions) -> PluginOutcome {
        let ports = match ports(options) {
            Ok(ports) if ports.is_empty() => {
                return PluginOutcome::NotConfigured(
                    "No ports configured. Set the `ports` option.".to_string(),
                )
            }
            Ok(ports) => ports,
            Err(e) => return PluginOutcome::NotConfigured(e),
        };
        let probe_timeout = match connect_timeout(options) {
            Ok(t) => t,
            Err(e) => return PluginOutcome::NotConfigured(e),
        };

        let mut open = Vec::new();
        let mut responded = false;
        for port in ports.iter().copied() {
            let addr = SocketAddr::new(target.ip, port);
            match timeout(probe_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => {
                    responded = true;
                    open.push(port);
                }
                // A refusal still proves the host is up.
                Ok(Err(e)) => {
                    responded = true;
                    tracing::debug!(address = %addr, error = %e, "Port closed");
                }
                Err(_elapsed) => {
                    tracing::debug!(address = %addr, "Connect timed out");
                }
            }
        }

        if !responded {
            return PluginOutcome::Failed(format!(
                "No response from {} on ports {:?}.",
                target.ip, ports
            ));
        }

        let mut facts = Map::new();
        facts.insert("open_ports".to_string(), json!(open));
        let mut result = PluginResult::success(
            PLUGIN_ID,
            DeviceFacts {
                system_ip_addresses: vec![target.ip.to_string()],
                facts,
            },
        );
        result
            .extra
            .insert("open_port_count".to_string(), json!(open.len()));
        PluginOutcome::Completed(result)
    }
}

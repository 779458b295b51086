//! Plugins shipped with the orchestrator.

pub mod tcp_ports;

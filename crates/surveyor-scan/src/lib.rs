//! surveyor-scan: scan orchestration for the Surveyor asset inventory.
//!
//! Routes scans of addresses, networks, data centers, and queues onto
//! per-network work queues, runs probe plugins against each address, and
//! postprocesses complete scans into a checksum with change detection.

pub mod checksum;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod plugin;
pub mod plugins;
pub mod postprocess;
pub mod runner;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use error::{Result, ScanError};
pub use orchestrator::Orchestrator;
pub use plugin::{Plugin, PluginOptions, PluginOutcome, PluginRegistry, ScanTarget};

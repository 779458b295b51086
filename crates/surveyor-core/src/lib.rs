//! surveyor-core: Shared types for the Surveyor scan orchestrator.
//!
//! This crate provides the records passed between the dispatcher, the
//! workers, and the stores:
//! - Inventory records (addresses, networks, data centers, scan summaries)
//! - Jobs, their payloads, and versioned progress records
//! - Plugin result payloads

pub mod job;
pub mod plugin;
pub mod types;

pub use job::{Job, JobHandle, JobId, JobProgress, JobState, ProgressUpdate, ScanPayload};
pub use plugin::{DeviceFacts, PluginResult, PluginStatus, ScanResults};
pub use types::{Address, Credentials, DataCenter, Network, ScanSummary, ScanSummaryId};

//! Surveyor Store — inventory and job-queue access for the scan orchestrator.
//!
//! This crate is the single mutation point for scan state. Address records,
//! scan summaries, and job progress all flow through the [`Inventory`] and
//! [`JobQueue`] traits so every writer applies the same update rules.

pub mod error;
pub mod inventory;
pub mod queue;

pub use error::{Result, StoreError};
pub use inventory::{Inventory, MemoryInventory};
pub use queue::{JobQueue, MemoryJobQueue};

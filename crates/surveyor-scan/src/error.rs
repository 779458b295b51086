//! Error types for the surveyor-scan crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /// The address or network has no work queue to scan it. Never retried.
    #[error("No queue: {0}")]
    NoQueue(String),

    #[error("Store error: {0}")]
    Store(#[from] surveyor_store::StoreError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;

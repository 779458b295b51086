//! Errors from inventory and job-queue operations.

use surveyor_core::JobId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unknown, cancelled, or expired job.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Data center not found: {0}")]
    DataCenterNotFound(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid inventory record: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

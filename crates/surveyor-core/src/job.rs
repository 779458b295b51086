//! Queued scan jobs and their progress records.
//!
//! A job's progress is a versioned record. Every change goes through
//! [`JobProgress::apply`] so the store can perform it as a single
//! read-modify-write and observers only ever see whole updates.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plugin::{PluginStatus, ScanResults};
use crate::types::Credentials;

// ── Identity ──────────────────────────────────────────────────────

/// Unique identifier for a queued job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned to the caller of a dispatch; the caller does not wait on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub queue: String,
}

// ── Payload ───────────────────────────────────────────────────────

/// The unit of work a worker executes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanPayload {
    /// Target address; absent for externally submitted results.
    pub address: Option<IpAddr>,
    /// Requested plugins in execution order. Empty means all configured.
    pub plugins: Vec<String>,
    pub credentials: Credentials,
    /// Results gathered outside the worker, postprocessed as-is.
    pub results: Option<ScanResults>,
}

// ── Progress ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One human-readable progress line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressMessage {
    pub address: IpAddr,
    pub plugin: String,
    pub severity: Severity,
    pub text: String,
}

impl ProgressMessage {
    pub fn new(address: IpAddr, plugin: &str, severity: Severity, text: impl Into<String>) -> Self {
        Self {
            address,
            plugin: plugin.to_string(),
            severity,
            text: text.into(),
        }
    }
}

/// Externally pollable progress of a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    /// Bumped on every applied update.
    pub version: u64,
    pub messages: Vec<ProgressMessage>,
    pub finished: Vec<String>,
    pub status: BTreeMap<String, PluginStatus>,
    pub results_checksum: Option<String>,
    pub changed: Option<bool>,
}

/// A single atomic change to a [`JobProgress`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Append a message.
    Message(ProgressMessage),
    /// Record a plugin's terminal status, its messages, and mark it finished.
    PluginFinished {
        plugin: String,
        status: PluginStatus,
        messages: Vec<ProgressMessage>,
    },
    /// Fold in the progress of the job this one supersedes.
    MergePrior(JobProgress),
    /// Mark plugins present in merged results as finished.
    AdoptResults(Vec<(String, PluginStatus)>),
    Checksum { checksum: String, changed: bool },
}

impl JobProgress {
    pub fn apply(&mut self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::Message(message) => self.messages.push(message),
            ProgressUpdate::PluginFinished {
                plugin,
                status,
                messages,
            } => {
                self.messages.extend(messages);
                self.status.insert(plugin.clone(), status);
                self.mark_finished(plugin);
            }
            ProgressUpdate::MergePrior(prior) => {
                // Prior messages only stand in when this run logged nothing.
                if self.messages.is_empty() {
                    self.messages = prior.messages;
                }
                for plugin in prior.finished {
                    self.mark_finished(plugin);
                }
                for (plugin, status) in prior.status {
                    self.status.entry(plugin).or_insert(status);
                }
            }
            ProgressUpdate::AdoptResults(entries) => {
                for (plugin, status) in entries {
                    self.status.entry(plugin.clone()).or_insert(status);
                    self.mark_finished(plugin);
                }
            }
            ProgressUpdate::Checksum { checksum, changed } => {
                self.results_checksum = Some(checksum);
                self.changed = Some(changed);
            }
        }
        self.version += 1;
    }

    pub fn is_finished(&self, plugin: &str) -> bool {
        self.finished.iter().any(|p| p == plugin)
    }

    fn mark_finished(&mut self, plugin: String) {
        if !self.is_finished(&plugin) {
            self.finished.push(plugin);
        }
    }
}

// ── Job ───────────────────────────────────────────────────────────

/// Runtime-visible job states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Failed,
}

/// A queued execution of the plugin runner against one address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: ScanPayload,
    pub state: JobState,
    pub progress: JobProgress,
    pub result: Option<ScanResults>,
    pub failure: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Upper bound on execution time.
    pub timeout: Duration,
    /// How long the result is kept after the job ends.
    pub result_ttl: Duration,
}

impl Job {
    pub fn new(queue: &str, payload: ScanPayload, timeout: Duration, result_ttl: Duration) -> Self {
        Self {
            id: JobId::new(),
            queue: queue.to_string(),
            payload,
            state: JobState::Queued,
            progress: JobProgress::default(),
            result: None,
            failure: None,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            timeout,
            result_ttl,
        }
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            queue: self.queue.clone(),
        }
    }

    /// Whether the retention window of an ended job has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ended_at) = self.ended_at else {
            return false;
        };
        let Ok(ttl) = TimeDelta::from_std(self.result_ttl) else {
            return false;
        };
        match ended_at.checked_add_signed(ttl) {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }
}

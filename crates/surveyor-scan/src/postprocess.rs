//! Result postprocessing: merge with the superseded job, checksum, and
//! change detection.
//!
//! Runs only for scans that covered the full configured plugin set. Work
//! for one address is serialised by a per-address lock, so two jobs for the
//! same address finishing together cannot interleave their summary updates.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use surveyor_core::{Job, JobId, ProgressUpdate, ScanResults, ScanSummary};
use surveyor_store::{Inventory, JobQueue, StoreError};

use crate::checksum::results_checksum;
use crate::error::Result;

/// What postprocessing decided for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessOutcome {
    pub address: IpAddr,
    /// Prior results overlaid with this job's results.
    pub results: ScanResults,
    pub checksum: String,
    pub changed: bool,
    /// The prior job that was cancelled, if any.
    pub superseded: Option<JobId>,
}

pub struct Postprocessor {
    inventory: Arc<dyn Inventory>,
    queue: Arc<dyn JobQueue>,
    locks: Mutex<HashMap<IpAddr, Arc<Mutex<()>>>>,
}

impl Postprocessor {
    pub fn new(inventory: Arc<dyn Inventory>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            inventory,
            queue,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Postprocess `results` of job `job_id`.
    ///
    /// Without `address` the results are attributed to the lowest system ip
    /// address any plugin reported, creating records as needed. An explicit
    /// address must already be in the inventory. Returns `None` when no
    /// inventory address can be attributed.
    pub async fn postprocess(
        &self,
        results: ScanResults,
        job_id: JobId,
        address: Option<IpAddr>,
    ) -> Result<Option<PostprocessOutcome>> {
        let ip = match address {
            Some(ip) => ip,
            None => match self.attribute(&results).await? {
                Some(ip) => ip,
                None => {
                    tracing::debug!(job_id = %job_id, "No address to attribute results to");
                    return Ok(None);
                }
            },
        };

        let lock = self.address_lock(ip).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.postprocess_address(results, job_id, ip).await
        };
        self.release_address_lock(ip, lock).await;
        outcome
    }

    async fn postprocess_address(
        &self,
        results: ScanResults,
        job_id: JobId,
        ip: IpAddr,
    ) -> Result<Option<PostprocessOutcome>> {
        let Some(mut address) = self.inventory.address(ip).await? else {
            tracing::warn!(job_id = %job_id, address = %ip, "Address is not in the inventory, skipping postprocessing");
            return Ok(None);
        };
        let existing = match address.scan_summary {
            Some(id) => {
                let summary = self.inventory.scan_summary(id).await?;
                if summary.is_none() {
                    tracing::warn!(address = %ip, summary_id = %id, "Linked scan summary is missing");
                }
                summary
            }
            None => None,
        };

        let (mut summary, prior) = match existing {
            Some(summary) => {
                let prior = self.prior_job(&summary, job_id).await?;
                (summary, prior)
            }
            None => {
                let summary = self.inventory.create_scan_summary(job_id).await?;
                tracing::debug!(address = %ip, summary_id = %summary.id, "Created scan summary");
                (summary, None)
            }
        };

        let mut merged = results;
        if let Some(prior) = &prior {
            self.queue
                .update_progress(job_id, ProgressUpdate::MergePrior(prior.progress.clone()))
                .await?;

            let adopted = merged
                .iter()
                .map(|(plugin, result)| (plugin.clone(), result.status))
                .collect();
            let mut combined = prior.result.clone().unwrap_or_default();
            combined.extend(merged);
            merged = combined;
            self.queue
                .update_progress(job_id, ProgressUpdate::AdoptResults(adopted))
                .await?;
        }

        summary.job_id = job_id;
        address.scan_summary = Some(summary.id);

        let checksum = results_checksum(&merged)?;
        let changed = detect_change(&mut summary, &checksum);
        self.queue
            .update_progress(
                job_id,
                ProgressUpdate::Checksum {
                    checksum: checksum.clone(),
                    changed,
                },
            )
            .await?;
        self.inventory.save_scan_summary(&summary).await?;
        self.inventory.save_address(&address).await?;

        let superseded = match prior {
            Some(prior) => self.supersede(prior.id).await,
            None => None,
        };

        tracing::info!(
            job_id = %job_id,
            address = %ip,
            checksum = %checksum,
            changed,
            "Scan postprocessed"
        );

        Ok(Some(PostprocessOutcome {
            address: ip,
            results: merged,
            checksum,
            changed,
            superseded,
        }))
    }

    async fn address_lock(&self, ip: IpAddr) -> Arc<Mutex<()>> {
        self.locks.lock().await.entry(ip).or_default().clone()
    }

    /// Drop the map entry once no other task holds or waits on the lock.
    async fn release_address_lock(&self, ip: IpAddr, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks.get(&ip).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(&ip);
        }
    }

    /// Lowest reported system address, creating a record for each one seen.
    async fn attribute(&self, results: &ScanResults) -> Result<Option<IpAddr>> {
        let reported: BTreeSet<IpAddr> = results
            .values()
            .flat_map(|result| result.system_ip_addresses())
            .collect();
        for ip in &reported {
            self.inventory.get_or_create_address(*ip).await?;
        }
        Ok(reported.into_iter().next())
    }

    async fn prior_job(&self, summary: &ScanSummary, job_id: JobId) -> Result<Option<Job>> {
        if summary.job_id == job_id {
            return Ok(None);
        }
        match self.queue.fetch(summary.job_id).await {
            Ok(job) => Ok(Some(job)),
            Err(StoreError::JobNotFound(id)) => {
                tracing::debug!(job_id = %id, "Prior job is gone, nothing to merge");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn supersede(&self, prior: JobId) -> Option<JobId> {
        match self.queue.cancel(prior).await {
            Ok(()) => Some(prior),
            Err(StoreError::JobNotFound(_)) => None,
            Err(e) => {
                tracing::warn!(job_id = %prior, error = %e, "Failed to cancel superseded job");
                None
            }
        }
    }
}

/// Whether `checksum` is a change against the accepted state of `summary`.
///
/// A match with the false-positive checksum is not a change and consumes
/// the marker. `previous_checksum` is left as is.
pub fn detect_change(summary: &mut ScanSummary, checksum: &str) -> bool {
    if summary.false_positive_checksum.as_deref() == Some(checksum) {
        summary.false_positive_checksum = None;
        return false;
    }
    summary.previous_checksum.as_deref() != Some(checksum)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use surveyor_core::job::{ProgressMessage, Severity};
    use surveyor_core::{Address, DeviceFacts, PluginResult, PluginStatus, ScanPayload};
    use surveyor_store::{MemoryInventory, MemoryJobQueue};

    use super::*;

    struct Fixture {
        inventory: Arc<MemoryInventory>,
        queue: Arc<MemoryJobQueue>,
        post: Postprocessor,
    }

    fn fixture() -> Fixture {
        let inventory = Arc::new(MemoryInventory::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let post = Postprocessor::new(inventory.clone(), queue.clone());
        Fixture {
            inventory,
            queue,
            post,
        }
    }

    fn ip() -> IpAddr {
        "10.0.0.1".parse().unwrap()
    }

    fn facts(hostname: &str) -> PluginResult {
        let mut device = DeviceFacts::default();
        device.facts.insert("hostname".to_string(), json!(hostname));
        PluginResult::success("a", device)
    }

    impl Fixture {
        async fn job(&self) -> JobId {
            self.queue
                .enqueue(
                    "default",
                    ScanPayload::default(),
                    Duration::from_secs(300),
                    Duration::from_secs(3600),
                )
                .await
                .unwrap()
                .id
        }

        async fn summary_of(&self) -> ScanSummary {
            let address = self.inventory.address(ip()).await.unwrap().unwrap();
            self.inventory
                .scan_summary(address.scan_summary.unwrap())
                .await
                .unwrap()
                .unwrap()
        }

        async fn link_summary(&self, summary: &ScanSummary) {
            self.inventory.save_scan_summary(summary).await.unwrap();
            let mut address = Address::new(ip());
            address.scan_summary = Some(summary.id);
            self.inventory.insert_address(address).await;
        }
    }

    #[test]
    fn test_false_positive_match_clears_marker() {
        let mut summary = ScanSummary::new(JobId::new());
        summary.false_positive_checksum = Some("x".to_string());
        assert!(!detect_change(&mut summary, "x"));
        assert!(summary.false_positive_checksum.is_none());
        assert!(detect_change(&mut summary, "x"));

        summary.previous_checksum = Some("y".to_string());
        assert!(!detect_change(&mut summary, "y"));
        assert_eq!(summary.previous_checksum.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_merges_with_prior_job_and_cancels_it() {
        let f = fixture();
        let m1 = ProgressMessage::new(ip(), "a", Severity::Warning, "m1");

        let prior = f.job().await;
        f.queue
            .update_progress(
                prior,
                ProgressUpdate::PluginFinished {
                    plugin: "a".to_string(),
                    status: PluginStatus::Success,
                    messages: vec![m1.clone()],
                },
            )
            .await
            .unwrap();
        f.queue
            .update_progress(
                prior,
                ProgressUpdate::PluginFinished {
                    plugin: "b".to_string(),
                    status: PluginStatus::Error,
                    messages: vec![],
                },
            )
            .await
            .unwrap();
        let mut prior_results = ScanResults::new();
        prior_results.insert("a".to_string(), facts("old"));
        prior_results.insert("b".to_string(), PluginResult::error("b", vec!["m1".into()]));
        f.queue.finish(prior, prior_results).await.unwrap();
        let summary = f.inventory.create_scan_summary(prior).await.unwrap();
        f.link_summary(&summary).await;

        let current = f.job().await;
        f.queue
            .update_progress(
                current,
                ProgressUpdate::PluginFinished {
                    plugin: "a".to_string(),
                    status: PluginStatus::Success,
                    messages: vec![],
                },
            )
            .await
            .unwrap();
        let mut results = ScanResults::new();
        results.insert("a".to_string(), facts("new"));

        let outcome = f
            .post
            .postprocess(results, current, Some(ip()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.superseded, Some(prior));
        assert_eq!(outcome.results["a"].device, facts("new").device);
        assert_eq!(outcome.results["b"].status, PluginStatus::Error);

        let progress = f.queue.fetch(current).await.unwrap().progress;
        assert_eq!(progress.finished, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(progress.status["a"], PluginStatus::Success);
        assert_eq!(progress.status["b"], PluginStatus::Error);
        assert_eq!(progress.messages, vec![m1]);
        assert_eq!(progress.results_checksum.as_deref(), Some(outcome.checksum.as_str()));

        assert!(matches!(
            f.queue.fetch(prior).await,
            Err(StoreError::JobNotFound(_))
        ));
        let summary = f.summary_of().await;
        assert_eq!(summary.job_id, current);
    }

    #[tokio::test]
    async fn test_false_positive_then_third_run_changes() {
        let f = fixture();
        let mut results = ScanResults::new();
        results.insert("a".to_string(), facts("sw-1"));
        let checksum = results_checksum(&results).unwrap();

        let mut summary = f.inventory.create_scan_summary(JobId::new()).await.unwrap();
        summary.previous_checksum = Some("accepted".to_string());
        summary.false_positive_checksum = Some(checksum.clone());
        f.link_summary(&summary).await;

        let second = f.job().await;
        let outcome = f
            .post
            .postprocess(results.clone(), second, Some(ip()))
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.checksum, checksum);
        assert!(f.summary_of().await.false_positive_checksum.is_none());
        assert_eq!(
            f.queue.fetch(second).await.unwrap().progress.changed,
            Some(false)
        );

        let third = f.job().await;
        let outcome = f
            .post
            .postprocess(results, third, Some(ip()))
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.superseded, Some(second));
        assert_eq!(f.summary_of().await.previous_checksum.as_deref(), Some("accepted"));
    }

    #[tokio::test]
    async fn test_matching_previous_checksum_is_unchanged() {
        let f = fixture();
        let mut results = ScanResults::new();
        results.insert("a".to_string(), facts("sw-1"));

        let mut summary = f.inventory.create_scan_summary(JobId::new()).await.unwrap();
        summary.previous_checksum = Some(results_checksum(&results).unwrap());
        f.link_summary(&summary).await;

        let job = f.job().await;
        let outcome = f
            .post
            .postprocess(results, job, Some(ip()))
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_vanished_prior_job_means_no_merge() {
        let f = fixture();
        let summary = f.inventory.create_scan_summary(JobId::new()).await.unwrap();
        f.link_summary(&summary).await;

        let job = f.job().await;
        let mut results = ScanResults::new();
        results.insert("a".to_string(), facts("sw-1"));
        let outcome = f
            .post
            .postprocess(results, job, Some(ip()))
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.superseded, None);
        assert_eq!(outcome.results.len(), 1);
        assert!(f.queue.fetch(job).await.unwrap().progress.finished.is_empty());
        assert_eq!(f.summary_of().await.id, summary.id);
    }

    #[tokio::test]
    async fn test_first_scan_creates_and_links_summary() {
        let f = fixture();
        f.inventory.insert_address(Address::new(ip())).await;
        let job = f.job().await;
        let outcome = f
            .post
            .postprocess(ScanResults::new(), job, Some(ip()))
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.changed);

        let summary = f.summary_of().await;
        assert_eq!(summary.job_id, job);
        assert!(summary.previous_checksum.is_none());
    }

    #[tokio::test]
    async fn test_explicit_address_outside_inventory_is_a_no_op() {
        let f = fixture();
        let job = f.job().await;

        let outcome = f
            .post
            .postprocess(ScanResults::new(), job, Some(ip()))
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(f.inventory.address_count().await, 0);
        assert!(f.queue.fetch(job).await.unwrap().progress.results_checksum.is_none());
    }

    #[tokio::test]
    async fn test_address_locks_are_released_after_use() {
        let f = fixture();
        for host in 1..=200u8 {
            let ip: IpAddr = format!("10.9.0.{host}").parse().unwrap();
            f.inventory.insert_address(Address::new(ip)).await;
            let job = f.job().await;
            f.post
                .postprocess(ScanResults::new(), job, Some(ip))
                .await
                .unwrap()
                .unwrap();
        }
        // Missing addresses take the early return and must release too.
        let job = f.job().await;
        f.post
            .postprocess(ScanResults::new(), job, Some("10.9.1.1".parse().unwrap()))
            .await
            .unwrap();

        assert!(f.post.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_postprocessing_of_one_address_releases_its_lock() {
        let f = Arc::new(fixture());
        f.inventory.insert_address(Address::new(ip())).await;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let f = f.clone();
            tasks.spawn(async move {
                let job = f.job().await;
                f.post
                    .postprocess(ScanResults::new(), job, Some(ip()))
                    .await
                    .unwrap()
                    .unwrap()
            });
        }
        let mut outcomes = Vec::new();
        while let Some(outcome) = tasks.join_next().await {
            outcomes.push(outcome.unwrap());
        }

        assert_eq!(outcomes.len(), 8);
        assert_eq!(outcomes.iter().filter(|o| o.superseded.is_none()).count(), 1);
        assert!(f.post.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unattributable_results_are_a_no_op() {
        let f = fixture();
        let job = f.job().await;
        let mut results = ScanResults::new();
        results.insert("a".to_string(), facts("sw-1"));

        let outcome = f.post.postprocess(results, job, None).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(f.inventory.address_count().await, 0);
        assert!(f.queue.fetch(job).await.unwrap().progress.results_checksum.is_none());
    }

    #[tokio::test]
    async fn test_results_are_attributed_to_lowest_system_address() {
        let f = fixture();
        let job = f.job().await;
        let mut results = ScanResults::new();
        results.insert(
            "a".to_string(),
            PluginResult::success(
                "a",
                DeviceFacts {
                    system_ip_addresses: vec!["10.0.0.9".into(), "10.0.0.3".into()],
                    ..Default::default()
                },
            ),
        );

        let outcome = f
            .post
            .postprocess(results, job, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.address, "10.0.0.3".parse::<IpAddr>().unwrap());
        assert_eq!(f.inventory.address_count().await, 2);
    }
}

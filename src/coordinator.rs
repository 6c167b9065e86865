//! Run Coordinator - discovery followed by bounded parallel mirroring
//!
//! Owns the inventory for the duration of a run, lends each record to the
//! synchronizer, and folds the outcomes into a [`RunReport`].

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::inventory::RepositoryRecord;
use crate::mirror::{MirrorSynchronizer, OutcomeKind, SyncOutcome, SyncSettings};
use crate::progress::RunProgress;
use crate::traversal::{DiscoveryGap, GroupSource, GroupTraversal};

/// Outcome totals per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Counts {
    fn record(&mut self, kind: &OutcomeKind) {
        match kind {
            OutcomeKind::Created => self.created += 1,
            OutcomeKind::Updated => self.updated += 1,
            OutcomeKind::Unchanged => self.unchanged += 1,
            OutcomeKind::SkippedDryRun { .. } => self.skipped += 1,
            OutcomeKind::Failed { .. } => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped + self.failed
    }
}

/// One failed repository or discovery gap, as reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub path: String,
    pub code: &'static str,
    pub message: String,
}

impl FailureEntry {
    fn new(path: &str, cause: &ArchiveError) -> Self {
        Self {
            path: path.to_string(),
            code: cause.code(),
            message: cause.to_string(),
        }
    }
}

impl From<&DiscoveryGap> for FailureEntry {
    fn from(gap: &DiscoveryGap) -> Self {
        Self::new(&gap.group_path, &gap.cause)
    }
}

/// Summary of one archive run
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// No failed repository, no gap, and the run was not interrupted.
    pub success: bool,
    pub root: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub discovered: usize,
    pub groups_visited: usize,
    pub counts: Counts,
    pub failures: Vec<FailureEntry>,
    pub gaps: Vec<FailureEntry>,
    pub cancelled: bool,
    pub not_attempted: usize,
    /// Per-repository outcomes, sorted by path
    #[serde(skip)]
    pub outcomes: Vec<SyncOutcome>,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            2
        }
    }
}

/// Ties traversal and synchronization together for one root group
pub struct RunCoordinator {
    traversal: GroupTraversal,
    synchronizer: MirrorSynchronizer,
    max_parallel: usize,
    cancel: Arc<AtomicBool>,
    show_progress: bool,
}

impl RunCoordinator {
    pub fn new(traversal: GroupTraversal, synchronizer: MirrorSynchronizer, max_parallel: usize) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        Self {
            traversal,
            synchronizer: synchronizer.with_cancel_flag(Arc::clone(&cancel)),
            max_parallel: max_parallel.max(1),
            cancel,
            show_progress: false,
        }
    }

    /// Draw progress bars on stderr while repositories are synchronized.
    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    /// Wire up a coordinator from configuration and a listing source.
    pub fn from_config(config: &Config, source: Arc<dyn GroupSource>) -> Self {
        Self::new(
            GroupTraversal::new(source, config.discovery.max_parallel),
            MirrorSynchronizer::new(SyncSettings::from_config(config)),
            config.sync.max_parallel,
        )
    }

    /// Flag that stops new repository work once set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Discover everything under `root_path` and mirror it.
    ///
    /// Returns `Err` only when the root group cannot be resolved.
    pub async fn run(&self, root_path: &str, dry_run: bool) -> Result<RunReport> {
        let started_at = Utc::now();
        let start_time = Instant::now();

        if dry_run {
            info!("Dry run: no mirror will be created or modified");
        }

        let discovery = self.traversal.discover(root_path).await?;
        let gaps: Vec<FailureEntry> = discovery.gaps.iter().map(FailureEntry::from).collect();

        let (mut outcomes, not_attempted) = self
            .sync_all(&discovery.root.full_path, discovery.inventory.records(), dry_run)
            .await;
        outcomes.sort_by(|a, b| a.record.full_path.cmp(&b.record.full_path));

        let mut counts = Counts::default();
        let mut failures = Vec::new();
        for outcome in &outcomes {
            counts.record(&outcome.kind);
            if let OutcomeKind::Failed { cause } = &outcome.kind {
                failures.push(FailureEntry::new(&outcome.record.full_path, cause));
            }
        }

        let cancelled = self.is_cancelled();
        if cancelled {
            let cause = ArchiveError::Cancelled { not_attempted };
            warn!("{}", cause);
            failures.push(FailureEntry::new(&discovery.root.full_path, &cause));
        }

        let report = RunReport {
            success: counts.failed == 0 && gaps.is_empty() && !cancelled,
            root: discovery.root.full_path.clone(),
            dry_run,
            started_at,
            duration: start_time.elapsed(),
            discovered: discovery.inventory.len(),
            groups_visited: discovery.groups_visited,
            counts,
            failures,
            gaps,
            cancelled,
            not_attempted,
            outcomes,
        };

        info!(
            "Run finished in {:.2}s: {} created, {} updated, {} unchanged, {} skipped, {} failed, {} gaps",
            report.duration.as_secs_f64(),
            report.counts.created,
            report.counts.updated,
            report.counts.unchanged,
            report.counts.skipped,
            report.counts.failed,
            report.gaps.len()
        );

        Ok(report)
    }

    /// Synchronize records with at most `max_parallel` in flight.
    ///
    /// Returns the outcomes and the number of records never started.
    async fn sync_all(
        &self,
        root_path: &str,
        records: &[RepositoryRecord],
        dry_run: bool,
    ) -> (Vec<SyncOutcome>, usize) {
        info!(
            "Syncing {} repositories with concurrency {}",
            records.len(),
            self.max_parallel
        );

        let semaphore = Semaphore::new(self.max_parallel);
        let mut futures = FuturesUnordered::new();

        for record in records {
            let semaphore = &semaphore;
            futures.push(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return None;
                };
                if self.is_cancelled() {
                    debug!("Not starting {}: run cancelled", record.full_path);
                    return None;
                }
                Some(self.synchronizer.sync(record, dry_run).await)
            });
        }

        let mut progress = RunProgress::new(root_path, records, self.show_progress);
        let mut outcomes = Vec::with_capacity(records.len());
        let mut not_attempted = 0usize;
        while let Some(result) = futures.next().await {
            match result {
                Some(outcome) => {
                    progress.advance(&outcome);
                    outcomes.push(outcome);
                }
                None => not_attempted += 1,
            }
        }
        progress.finish();

        (outcomes, not_attempted)
    }
}

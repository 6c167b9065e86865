//! Live progress for the synchronization phase
//!
//! One bar for the whole run plus one per top-level subgroup of the root,
//! so a long run shows which part of the tree is still being mirrored.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::BTreeMap;

use crate::inventory::RepositoryRecord;
use crate::mirror::SyncOutcome;

/// Bucket for repositories that sit directly in the root group
pub const ROOT_BUCKET: &str = "[root]";

const TEMPLATE: &str = "{prefix:>24.bold} [{bar:30.cyan/blue}] {pos}/{len} {elapsed_precise} {msg}";

/// Top-level subgroup of `root` that `full_path` belongs to.
///
/// Paths outside `root` are bucketed by their own first segment.
pub fn bucket_for(full_path: &str, root: &str) -> String {
    let full_path = full_path.trim_matches('/');
    let relative = full_path
        .strip_prefix(root.trim_matches('/'))
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(full_path);

    match relative.split_once('/') {
        Some((first, _)) => first.to_string(),
        None => ROOT_BUCKET.to_string(),
    }
}

pub struct RunProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    buckets: BTreeMap<String, ProgressBar>,
    root: String,
    failed: u64,
}

impl RunProgress {
    /// Bars sized from `records`. When `visible` is false nothing is drawn
    /// but positions are still tracked.
    pub fn new(root: &str, records: &[RepositoryRecord], visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let multi = MultiProgress::with_draw_target(target);
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let overall = multi.add(ProgressBar::new(records.len() as u64));
        overall.set_style(style.clone());
        overall.set_prefix("All repositories");

        let mut sizes: BTreeMap<String, u64> = BTreeMap::new();
        for record in records {
            *sizes.entry(bucket_for(&record.full_path, root)).or_default() += 1;
        }
        let buckets = sizes
            .into_iter()
            .map(|(name, len)| {
                let bar = multi.add(ProgressBar::new(len));
                bar.set_style(style.clone());
                bar.set_prefix(name.clone());
                (name, bar)
            })
            .collect();

        Self {
            multi,
            overall,
            buckets,
            root: root.to_string(),
            failed: 0,
        }
    }

    /// Count one finished repository.
    pub fn advance(&mut self, outcome: &SyncOutcome) {
        self.overall.inc(1);
        if outcome.kind.is_failure() {
            self.failed += 1;
            self.overall.set_message(format!("{} failed", self.failed));
        }
        let bucket = bucket_for(&outcome.record.full_path, &self.root);
        if let Some(bar) = self.buckets.get(&bucket) {
            bar.inc(1);
        }
    }

    pub fn completed(&self) -> u64 {
        self.overall.position()
    }

    pub fn bucket_completed(&self, bucket: &str) -> Option<u64> {
        self.buckets.get(bucket).map(|bar| bar.position())
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Remove the bars so the summary starts on a clean line.
    pub fn finish(self) {
        for bar in self.buckets.values() {
            bar.finish_and_clear();
        }
        self.overall.finish_and_clear();
        let _ = self.multi.clear();
    }
}

use crate::config::{DetectorConfig, MAX_WORKERS_CAP};
use crate::core::cluster::{sort_clusters, ReuploadCluster};
use crate::core::detector::{DetectionError, FeatureStore, ReuploadDetector};
use crate::core::item::Item;
use crate::core::stats::Statistics;
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// How one Code group ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupOutcome {
    /// Processed; may legitimately have found nothing.
    Completed { clusters: usize },
    /// Never processed.
    Skipped { reason: String },
    /// Aborted by a group-scoped error; contributes no clusters.
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub code: String,
    pub items: usize,
    pub outcome: GroupOutcome,
}

/// Result of a whole run. Completed groups keep their clusters even when
/// the run was cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRun {
    pub clusters: Vec<ReuploadCluster>,
    pub groups: Vec<GroupReport>,
    pub statistics: Statistics,
    pub cancelled: bool,
}

impl DetectionRun {
    pub fn failed_groups(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups
            .iter()
            .filter(|g| matches!(g.outcome, GroupOutcome::Failed { .. }))
    }
}

/// Partitions items by Code and runs every eligible group on a bounded
/// worker pool.
pub struct DetectionPipeline {
    detector: ReuploadDetector,
    cancellation_token: Arc<AtomicBool>,
    progress: ProgressBar,
    max_workers: usize,
}

impl DetectionPipeline {
    pub fn new(config: DetectorConfig) -> Self {
        let max_workers = config.processing.workers();
        Self {
            detector: ReuploadDetector::new(config),
            cancellation_token: Arc::new(AtomicBool::new(false)),
            progress: ProgressBar::hidden(),
            max_workers,
        }
    }

    /// Advanced once per finished group; its length is set by [`run`](Self::run).
    pub fn with_progress_bar(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.clamp(1, MAX_WORKERS_CAP);
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    /// Worker count for `eligible_groups` groups.
    pub fn effective_workers(&self, eligible_groups: usize) -> usize {
        self.max_workers
            .min(eligible_groups)
            .clamp(1, MAX_WORKERS_CAP)
    }

    pub fn run(&self, items: &[Item], features: &FeatureStore) -> DetectionRun {
        let mut groups: BTreeMap<&str, Vec<&Item>> = BTreeMap::new();
        for item in items {
            groups.entry(item.code.as_str()).or_default().push(item);
        }

        let mut reports = Vec::new();
        let mut eligible = Vec::new();
        for (code, members) in groups {
            if members.len() < 2 {
                log::debug!("Skipping group {} with a single item", code);
                reports.push(GroupReport {
                    code: code.to_string(),
                    items: members.len(),
                    outcome: GroupOutcome::Skipped {
                        reason: "fewer than two items".to_string(),
                    },
                });
            } else {
                eligible.push((code, members));
            }
        }

        let workers = self.effective_workers(eligible.len());
        log::info!(
            "Processing {} items in {} groups ({} eligible) with {} workers",
            items.len(),
            reports.len() + eligible.len(),
            eligible.len(),
            workers
        );

        self.progress.set_length(eligible.len() as u64);
        self.progress.set_position(0);
        let completed = AtomicUsize::new(0);

        let process = || {
            eligible
                .par_iter()
                .map(|(code, members)| self.process_group(code, members, features, &completed))
                .collect::<Vec<_>>()
        };
        let results = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(process),
            Err(e) => {
                log::warn!("Failed to build worker pool, using the global pool: {}", e);
                process()
            }
        };
        self.progress.finish();

        let mut clusters = Vec::new();
        for (report, group_clusters) in results {
            clusters.extend(group_clusters);
            reports.push(report);
        }
        sort_clusters(&mut clusters);
        reports.sort_by(|a, b| a.code.cmp(&b.code));

        let cancelled = reports
            .iter()
            .any(|r| r.outcome == GroupOutcome::Cancelled);
        let statistics = Statistics::compute(items.len(), &clusters);
        log::info!(
            "Detection complete: {} clusters, {} reuploads{}",
            clusters.len(),
            statistics.total_reuploads,
            if cancelled { " (cancelled)" } else { "" }
        );

        DetectionRun {
            clusters,
            groups: reports,
            statistics,
            cancelled,
        }
    }

    fn process_group(
        &self,
        code: &str,
        members: &[&Item],
        features: &FeatureStore,
        completed: &AtomicUsize,
    ) -> (GroupReport, Vec<ReuploadCluster>) {
        let report = |outcome| GroupReport {
            code: code.to_string(),
            items: members.len(),
            outcome,
        };

        if self.is_cancelled() {
            return (report(GroupOutcome::Cancelled), Vec::new());
        }

        self.progress.set_message(code.to_string());
        let result = self.detector.detect_group_with_cancel(
            code,
            members,
            features,
            &self.cancellation_token,
        );

        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        self.progress.set_position(done as u64);

        match result {
            Ok(clusters) => (
                report(GroupOutcome::Completed {
                    clusters: clusters.len(),
                }),
                clusters,
            ),
            Err(DetectionError::Cancelled) => (report(GroupOutcome::Cancelled), Vec::new()),
            Err(e) => {
                log::warn!("Group {} failed: {}", code, e);
                (
                    report(GroupOutcome::Failed {
                        reason: e.to_string(),
                    }),
                    Vec::new(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::{AudioFeatures, RemixDescriptors};
    use crate::core::item::ItemRecord;

    fn audio_item(id: &str, code: &str) -> Item {
        Item::from_record(ItemRecord {
            id: id.to_string(),
            declared_type: "Audio".to_string(),
            code: code.to_string(),
            upload_date: format!("2020010{id}"),
            audio: Some(format!("{id}.wav")),
            ..Default::default()
        })
    }

    fn features(ids: &[&str]) -> FeatureStore {
        let mut store = FeatureStore::default();
        for id in ids {
            store.audio.insert(
                format!("{id}.wav"),
                AudioFeatures {
                    mfcc: vec![1.0, 2.0, 3.0],
                    chroma: vec![0.5, 0.1, 0.3],
                    spectral_contrast: vec![4.0, 5.0],
                    tempo: 100.0,
                    duration: 20.0,
                    remix: RemixDescriptors::default(),
                    singer_count: None,
                },
            );
        }
        store
    }

    #[test]
    fn test_groups_are_isolated_by_code() {
        let items = vec![
            audio_item("1", "A"),
            audio_item("2", "A"),
            audio_item("3", "B"),
            audio_item("4", "B"),
        ];
        let store = features(&["1", "2", "3", "4"]);
        let run = DetectionPipeline::new(DetectorConfig::default()).run(&items, &store);

        assert_eq!(run.clusters.len(), 2);
        for cluster in &run.clusters {
            assert_eq!(cluster.size(), 2);
            assert!(cluster.members().all(|m| {
                items
                    .iter()
                    .find(|i| i.id == m.id)
                    .is_some_and(|i| i.code == cluster.code)
            }));
        }
        assert!(!run.cancelled);
    }

    #[test]
    fn test_single_item_group_is_skipped() {
        let items = vec![audio_item("1", "A"), audio_item("2", "A"), audio_item("3", "B")];
        let run = DetectionPipeline::new(DetectorConfig::default()).run(&items, &features(&["1", "2", "3"]));
        let b = run.groups.iter().find(|g| g.code == "B").unwrap();
        assert!(matches!(b.outcome, GroupOutcome::Skipped { .. }));
    }

    #[test]
    fn test_failed_group_does_not_affect_siblings() {
        let items = vec![
            audio_item("1", "A"),
            audio_item("2", "A"),
            audio_item("3", "B"),
            audio_item("4", "B"),
        ];
        // group B has no features at all
        let run = DetectionPipeline::new(DetectorConfig::default()).run(&items, &features(&["1", "2"]));

        assert_eq!(run.clusters.len(), 1);
        assert_eq!(run.clusters[0].code, "A");
        let failed: Vec<&str> = run.failed_groups().map(|g| g.code.as_str()).collect();
        assert_eq!(failed, vec!["B"]);
    }

    #[test]
    fn test_cancelled_before_start() {
        let items = vec![audio_item("1", "A"), audio_item("2", "A")];
        let pipeline = DetectionPipeline::new(DetectorConfig::default());
        pipeline.cancel();
        let run = pipeline.run(&items, &features(&["1", "2"]));
        assert!(run.cancelled);
        assert!(run.clusters.is_empty());
        assert_eq!(run.groups[0].outcome, GroupOutcome::Cancelled);
    }

    #[test]
    fn test_effective_workers() {
        let pipeline = DetectionPipeline::new(DetectorConfig::default()).with_workers(8);
        assert_eq!(pipeline.effective_workers(3), 3);
        assert_eq!(pipeline.effective_workers(0), 1);
        assert_eq!(pipeline.effective_workers(100), 8);
        assert_eq!(
            DetectionPipeline::new(DetectorConfig::default())
                .with_workers(40)
                .effective_workers(100),
            MAX_WORKERS_CAP
        );
    }
}

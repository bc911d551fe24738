use crate::config::DetectorConfig;
use crate::services::pipeline::{DetectionRun, GroupOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to access report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid report {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A saved detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    pub config: DetectorConfig,
    #[serde(flatten)]
    pub run: DetectionRun,
}

impl DetectionReport {
    pub fn new(run: DetectionRun, config: DetectorConfig, manifest: Option<&Path>) -> Self {
        Self {
            generated_at: Utc::now(),
            manifest: manifest.map(|p| p.display().to_string()),
            config,
            run,
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ReportError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ReportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, json).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ReportError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Human-readable summary as printed by the CLI.
    pub fn summary(&self) -> String {
        let run = &self.run;
        let stats = &run.statistics;
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Report generated {}{}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            if run.cancelled { " (cancelled, partial)" } else { "" }
        );
        let _ = writeln!(
            out,
            "Items: {}  Originals: {}  Reuploads: {} ({:.1}%)  Avg similarity: {:.1}%",
            stats.total_items,
            stats.total_originals,
            stats.total_reuploads,
            stats.reupload_percentage,
            stats.average_similarity * 100.0
        );
        for (kind, count) in &stats.reuploads_by_type {
            let _ = writeln!(out, "  {kind}: {count} reuploads");
        }

        let mut skipped = 0;
        for group in &run.groups {
            match &group.outcome {
                GroupOutcome::Failed { reason } => {
                    let _ = writeln!(out, "  ✗ group {} failed: {}", group.code, reason);
                }
                GroupOutcome::Cancelled => {
                    let _ = writeln!(out, "  ⏹ group {} cancelled", group.code);
                }
                GroupOutcome::Skipped { .. } => skipped += 1,
                GroupOutcome::Completed { .. } => {}
            }
        }
        if skipped > 0 {
            let _ = writeln!(out, "  {skipped} single-item group(s) skipped");
        }

        for (n, cluster) in run.clusters.iter().enumerate() {
            let _ = writeln!(
                out,
                " Cluster {} [{}] {} ({} items, {}):",
                n + 1,
                cluster.code,
                cluster.dominant_type,
                cluster.size(),
                cluster.threshold
            );
            let _ = writeln!(
                out,
                "   ★ {} {} ({})",
                cluster.original.id, cluster.original.source, cluster.original.upload_date
            );
            for reupload in &cluster.reuploads {
                let _ = writeln!(
                    out,
                    "   ▶ {} {} ({:.1}%)",
                    reupload.item.id,
                    reupload.item.source,
                    reupload.similarity * 100.0
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stats::Statistics;
    use crate::services::pipeline::GroupReport;
    use tempfile::TempDir;

    fn run() -> DetectionRun {
        DetectionRun {
            clusters: Vec::new(),
            groups: vec![
                GroupReport {
                    code: "A".to_string(),
                    items: 3,
                    outcome: GroupOutcome::Failed {
                        reason: "No features available for comparison in group A".to_string(),
                    },
                },
                GroupReport {
                    code: "B".to_string(),
                    items: 1,
                    outcome: GroupOutcome::Skipped {
                        reason: "fewer than two items".to_string(),
                    },
                },
            ],
            statistics: Statistics::compute(4, &[]),
            cancelled: true,
        }
    }

    #[test]
    fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out").join("report.json");
        let report = DetectionReport::new(run(), DetectorConfig::default(), None);
        report.write(&path).unwrap();

        let loaded = DetectionReport::read(&path).unwrap();
        assert_eq!(loaded.generated_at, report.generated_at);
        assert_eq!(loaded.run.groups, report.run.groups);
        assert!(loaded.run.cancelled);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["cancelled"], serde_json::Value::Bool(true));
        assert_eq!(raw["groups"][0]["outcome"]["status"], "failed");
    }

    #[test]
    fn test_summary_mentions_failures() {
        let report = DetectionReport::new(run(), DetectorConfig::default(), None);
        let summary = report.summary();
        assert!(summary.contains("cancelled, partial"));
        assert!(summary.contains("group A failed"));
        assert!(summary.contains("1 single-item group(s) skipped"));
    }

    #[test]
    fn test_missing_report() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            DetectionReport::read(&temp_dir.path().join("nope.json")),
            Err(ReportError::Io { .. })
        ));
    }
}

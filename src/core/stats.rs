use super::cluster::ReuploadCluster;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate figures for one detection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_items: usize,
    /// One original per cluster.
    pub total_originals: usize,
    pub total_reuploads: usize,
    /// Reuploads as a percentage of all items.
    pub reupload_percentage: f64,
    /// Reupload count keyed by cluster type.
    pub reuploads_by_type: BTreeMap<String, usize>,
    /// Mean over clusters of each cluster's mean similarity to its original.
    pub average_similarity: f64,
}

impl Statistics {
    pub fn compute(total_items: usize, clusters: &[ReuploadCluster]) -> Self {
        let total_reuploads: usize = clusters.iter().map(|c| c.reuploads.len()).sum();

        let mut reuploads_by_type = BTreeMap::new();
        for cluster in clusters {
            *reuploads_by_type
                .entry(cluster.dominant_type.clone())
                .or_insert(0) += cluster.reuploads.len();
        }

        let reupload_percentage = if total_items > 0 {
            total_reuploads as f64 / total_items as f64 * 100.0
        } else {
            0.0
        };

        let average_similarity = if clusters.is_empty() {
            0.0
        } else {
            clusters.iter().map(ReuploadCluster::mean_similarity).sum::<f64>()
                / clusters.len() as f64
        };

        Self {
            total_items,
            total_originals: clusters.len(),
            total_reuploads,
            reupload_percentage,
            reuploads_by_type,
            average_similarity,
        }
    }
}

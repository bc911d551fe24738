//! Reupload detection over batches of already-analysed media segments.
//!
//! Feature extraction happens elsewhere; this crate compares the extracted
//! vectors, fuses the per-modality scores and groups near-duplicates into
//! clusters that each carry one designated original.

pub mod config;
pub mod core;
pub mod services;

pub use config::DetectorConfig;
pub use crate::core::cluster::{ClusterMember, Reupload, ReuploadCluster};
pub use crate::core::detector::{DetectionError, FeatureStore, ReuploadDetector};
pub use crate::core::item::{DeclaredType, Item, ItemId, ItemRecord, TypeBucket};
pub use crate::core::stats::Statistics;
pub use services::pipeline::{DetectionPipeline, DetectionRun, GroupOutcome, GroupReport};

use super::audio::AudioComparator;
use super::cluster::{build_clusters, ReuploadCluster};
use super::features::{AudioFeatures, VideoFeatures};
use super::fusion::{FusionEngine, ItemTraits};
use super::item::{Item, ItemId, TypeBucket};
use super::matrix::build_matrix;
use super::video::VideoComparator;
use crate::config::DetectorConfig;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetectionError {
    #[error("No features available for comparison in group {code}")]
    NoFeaturesAvailable { code: String },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Read-only feature collections shared by every group of a run.
#[derive(Debug, Clone, Default)]
pub struct FeatureStore {
    /// Keyed by audio handle.
    pub audio: HashMap<String, AudioFeatures>,
    /// Keyed by video handle.
    pub video: HashMap<String, VideoFeatures>,
    pub singer_counts: HashMap<ItemId, u32>,
    /// Keyed by video handle.
    pub optical_flows: HashMap<String, f64>,
}

impl FeatureStore {
    pub fn audio_for(&self, item: &Item) -> Option<&AudioFeatures> {
        item.audio_handle.as_ref().and_then(|h| self.audio.get(h))
    }

    /// Audio-declared items never take part in video comparison.
    pub fn video_for(&self, item: &Item) -> Option<&VideoFeatures> {
        if item.declared_type.is_audio() {
            return None;
        }
        item.video_handle.as_ref().and_then(|h| self.video.get(h))
    }

    /// Explicit estimate first, then the audio extractor's; zero is unknown.
    pub fn singer_count(&self, item: &Item) -> Option<u32> {
        self.singer_counts
            .get(&item.id)
            .copied()
            .or_else(|| self.audio_for(item).and_then(|f| f.singer_count))
            .filter(|&count| count > 0)
    }

    pub fn optical_flow(&self, item: &Item) -> Option<f64> {
        let handle = item.video_handle.as_ref()?;
        self.optical_flows
            .get(handle)
            .copied()
            .or_else(|| self.video.get(handle).map(|f| f.optical_flow_magnitude))
            .filter(|flow| flow.is_finite())
    }

    pub fn traits(&self, item: &Item) -> ItemTraits {
        ItemTraits {
            declared_type: item.declared_type,
            optical_flow: self.optical_flow(item),
            singer_count: self.singer_count(item),
        }
    }

    pub fn has_any_features(&self, items: &[&Item]) -> bool {
        items
            .iter()
            .any(|item| self.audio_for(item).is_some() || self.video_for(item).is_some())
    }
}

/// Runs the matrix/fusion/clustering sequence for one Code group.
pub struct ReuploadDetector {
    config: DetectorConfig,
    audio: AudioComparator,
    video: VideoComparator,
}

impl ReuploadDetector {
    pub fn new(config: DetectorConfig) -> Self {
        log::debug!("ReuploadDetector initialized: {:?}", config.thresholds);
        Self {
            config,
            audio: AudioComparator::new(),
            video: VideoComparator::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detect_group(
        &self,
        code: &str,
        items: &[&Item],
        features: &FeatureStore,
    ) -> Result<Vec<ReuploadCluster>, DetectionError> {
        self.detect_group_with_cancel(code, items, features, &AtomicBool::new(false))
    }

    /// Like [`detect_group`](Self::detect_group), checking `cancel` before
    /// each matrix construction.
    pub fn detect_group_with_cancel(
        &self,
        code: &str,
        items: &[&Item],
        features: &FeatureStore,
        cancel: &AtomicBool,
    ) -> Result<Vec<ReuploadCluster>, DetectionError> {
        if !features.has_any_features(items) {
            return Err(DetectionError::NoFeaturesAvailable {
                code: code.to_string(),
            });
        }

        let mut seen = HashSet::new();
        let unique: Vec<&Item> = items
            .iter()
            .copied()
            .filter(|i| seen.insert(i.id.clone()))
            .collect();
        if unique.len() != items.len() {
            log::warn!(
                "Group {}: ignoring {} item(s) with a repeated id",
                code,
                items.len() - unique.len()
            );
        }
        let items = unique.as_slice();

        let lookup: HashMap<ItemId, &Item> = items.iter().map(|i| (i.id.clone(), *i)).collect();
        let traits: HashMap<ItemId, ItemTraits> = items
            .iter()
            .map(|i| (i.id.clone(), features.traits(i)))
            .collect();

        let (audio_items, video_items): (Vec<&Item>, Vec<&Item>) =
            items.iter().copied().partition(|i| i.declared_type.is_audio());
        log::info!(
            "Group {}: {} Audio, {} Video/Karaoke items",
            code,
            audio_items.len(),
            video_items.len()
        );

        let mut clusters = Vec::new();
        if audio_items.len() >= 2 {
            check_cancel(cancel)?;
            clusters.extend(self.detect_audio(code, &audio_items, features, &lookup, &traits));
        }
        if video_items.len() >= 2 {
            check_cancel(cancel)?;
            clusters.extend(self.detect_video(code, &video_items, features, &lookup, &traits));
        }

        let reuploads: usize = clusters.iter().map(|c| c.reuploads.len()).sum();
        log::info!(
            "Group {} complete: {} clusters, {} reuploads",
            code,
            clusters.len(),
            reuploads
        );
        Ok(clusters)
    }

    /// Audio-only comparison thresholded at `audio_similarity`.
    fn detect_audio(
        &self,
        code: &str,
        items: &[&Item],
        features: &FeatureStore,
        lookup: &HashMap<ItemId, &Item>,
        traits: &HashMap<ItemId, ItemTraits>,
    ) -> Vec<ReuploadCluster> {
        let ids: Vec<ItemId> = items.iter().map(|i| i.id.clone()).collect();
        let mut matrix = build_matrix(&self.audio, &ids, |id| {
            lookup.get(id).and_then(|item| features.audio_for(item))
        });
        if matrix.len() < 2 {
            log::warn!(
                "Group {}: only {} Audio items have audio features, nothing to compare",
                code,
                matrix.len()
            );
            return Vec::new();
        }

        FusionEngine::new(&self.config).apply_singer_penalty(&mut matrix, traits);

        let threshold = self.config.thresholds.audio_similarity;
        matrix.stats(threshold).log("Audio");
        let clusters = build_clusters(&matrix, threshold, lookup, code);
        log::info!(
            "Group {}: {} audio clusters at threshold {:.2}",
            code,
            clusters.len(),
            threshold
        );
        clusters
    }

    /// Fused comparison, clustered per type bucket.
    fn detect_video(
        &self,
        code: &str,
        items: &[&Item],
        features: &FeatureStore,
        lookup: &HashMap<ItemId, &Item>,
        traits: &HashMap<ItemId, ItemTraits>,
    ) -> Vec<ReuploadCluster> {
        let ids: Vec<ItemId> = items.iter().map(|i| i.id.clone()).collect();
        let audio_matrix = build_matrix(&self.audio, &ids, |id| {
            lookup.get(id).and_then(|item| features.audio_for(item))
        });
        let video_matrix = build_matrix(&self.video, &ids, |id| {
            lookup.get(id).and_then(|item| features.video_for(item))
        });
        if audio_matrix.is_empty() && video_matrix.is_empty() {
            log::warn!("Group {}: no features for any Video/Karaoke item", code);
            return Vec::new();
        }

        let engine = FusionEngine::new(&self.config);
        let fused = engine.fuse(&audio_matrix, &video_matrix, traits);
        let threshold = engine.effective_threshold(engine.count_static_pairs(&ids, traits));
        fused.matrix.stats(threshold).log("Video");

        let mut buckets: BTreeMap<TypeBucket, Vec<ItemId>> = BTreeMap::new();
        for item in items {
            if let Some(bucket) = item.declared_type.bucket() {
                buckets.entry(bucket).or_default().push(item.id.clone());
            }
        }

        let mut clusters = Vec::new();
        for (bucket, bucket_ids) in buckets {
            if self.config.grouping.compare_within_same_type_only && bucket_ids.len() < 2 {
                log::info!(
                    "Group {}: skipping type bucket '{}' with a single item",
                    code,
                    bucket.name()
                );
                continue;
            }
            let sub = fused.matrix.submatrix(&bucket_ids);
            log::debug!(
                "Group {}: clustering bucket '{}' ({} items, threshold {:.2})",
                code,
                bucket.name(),
                sub.len(),
                threshold
            );
            clusters.extend(build_clusters(&sub, threshold, lookup, code));
        }
        clusters
    }
}

fn check_cancel(cancel: &AtomicBool) -> Result<(), DetectionError> {
    if cancel.load(Ordering::Relaxed) {
        Err(DetectionError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::RemixDescriptors;
    use crate::core::item::ItemRecord;

    fn audio(seed: f64) -> AudioFeatures {
        AudioFeatures {
            mfcc: vec![seed, 1.0, 2.0, 3.0],
            chroma: vec![0.2, seed, 0.4, 0.1],
            spectral_contrast: vec![10.0, 12.0, seed],
            tempo: 120.0,
            duration: 30.0,
            remix: RemixDescriptors::default(),
            singer_count: None,
        }
    }

    fn record(id: &str, kind: &str, date: &str) -> ItemRecord {
        ItemRecord {
            id: id.to_string(),
            declared_type: kind.to_string(),
            code: "C1".to_string(),
            upload_date: date.to_string(),
            audio: Some(format!("{id}.wav")),
            video: (kind != "Audio").then(|| format!("{id}.mp4")),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_features_is_fatal_for_group() {
        let detector = ReuploadDetector::new(DetectorConfig::default());
        let items = [
            Item::from_record(record("1", "Video", "20200101")),
            Item::from_record(record("2", "Video", "20200102")),
        ];
        let refs: Vec<&Item> = items.iter().collect();
        assert_eq!(
            detector.detect_group("C1", &refs, &FeatureStore::default()),
            Err(DetectionError::NoFeaturesAvailable {
                code: "C1".to_string()
            })
        );
    }

    #[test]
    fn test_audio_bucket_without_video_map() {
        let detector = ReuploadDetector::new(DetectorConfig::default());
        let items = [
            Item::from_record(record("1", "Audio", "20200105")),
            Item::from_record(record("2", "Âm thanh", "20200101")),
        ];
        let mut store = FeatureStore::default();
        store.audio.insert("1.wav".to_string(), audio(5.0));
        store.audio.insert("2.wav".to_string(), audio(5.0));

        let refs: Vec<&Item> = items.iter().collect();
        let clusters = detector.detect_group("C1", &refs, &store).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].original.id, ItemId::from("2"));
    }

    #[test]
    fn test_repeated_id_keeps_first_item() {
        let detector = ReuploadDetector::new(DetectorConfig::default());
        let items = [
            Item::from_record(record("a", "Audio", "20200101")),
            Item::from_record(ItemRecord {
                audio: Some("copy.wav".to_string()),
                ..record("a", "Audio", "20200102")
            }),
            Item::from_record(record("b", "Audio", "20200103")),
        ];
        let mut store = FeatureStore::default();
        store.audio.insert("a.wav".to_string(), audio(5.0));
        store.audio.insert("copy.wav".to_string(), audio(5.0));
        store.audio.insert(
            "b.wav".to_string(),
            AudioFeatures {
                mfcc: vec![-5.0, -1.0, -2.0, -3.0],
                chroma: vec![1.0, 0.0, 0.0, 1.0],
                tempo: 240.0,
                ..audio(5.0)
            },
        );

        let refs: Vec<&Item> = items.iter().collect();
        let clusters = detector.detect_group("C1", &refs, &store).unwrap();
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_cancel_before_matrix_construction() {
        let detector = ReuploadDetector::new(DetectorConfig::default());
        let items = [
            Item::from_record(record("1", "Audio", "")),
            Item::from_record(record("2", "Audio", "")),
        ];
        let mut store = FeatureStore::default();
        store.audio.insert("1.wav".to_string(), audio(5.0));
        let refs: Vec<&Item> = items.iter().collect();
        let cancel = AtomicBool::new(true);
        assert_eq!(
            detector.detect_group_with_cancel("C1", &refs, &store, &cancel),
            Err(DetectionError::Cancelled)
        );
    }

    #[test]
    fn test_feature_store_lookups() {
        let mut store = FeatureStore::default();
        let video_item = Item::from_record(record("v", "Video", ""));
        let audio_item = Item::from_record(ItemRecord {
            video: Some("a.mp4".to_string()),
            ..record("a", "Audio", "")
        });
        store.video.insert(
            "a.mp4".to_string(),
            VideoFeatures {
                keyframe_embeddings: vec![],
                global_embedding: vec![1.0],
                optical_flow_magnitude: 3.0,
                frame_count: 10,
                fps: 25.0,
                duration: 1.0,
                scene: None,
            },
        );
        store.optical_flows.insert("v.mp4".to_string(), 8.0);
        store.singer_counts.insert(ItemId::from("v"), 0);
        store.audio.insert(
            "v.wav".to_string(),
            AudioFeatures {
                singer_count: Some(2),
                ..audio(1.0)
            },
        );

        assert!(store.video_for(&audio_item).is_none());
        assert_eq!(store.optical_flow(&audio_item), Some(3.0));
        assert_eq!(store.optical_flow(&video_item), Some(8.0));
        // explicit zero is unknown and does not fall through
        assert_eq!(store.singer_count(&video_item), None);
    }
}

//! Manifest and feature-file loading.
//!
//! A manifest is a JSON document holding the item rows and, optionally,
//! inline feature maps. Feature files found under a features directory are
//! merged on top: `<handle>.audio.json`, `<handle>.video.json` and
//! `<handle>.karaoke.json`, where `<handle>` is the path relative to the
//! directory with the suffix removed and `/` as separator.

use crate::config::DetectorConfig;
use crate::core::detector::FeatureStore;
use crate::core::features::{AudioFeatures, VideoFeatures};
use crate::core::item::{DeclaredType, Item, ItemId, ItemRecord};
use crate::core::karaoke::{KaraokeClassifier, KaraokeEvidence};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const AUDIO_SUFFIX: &str = ".audio.json";
const VIDEO_SUFFIX: &str = ".video.json";
const KARAOKE_SUFFIX: &str = ".karaoke.json";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Duplicate item identifier: {0}")]
    DuplicateId(String),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub items: Vec<ItemRecord>,
    /// Keyed by audio handle.
    #[serde(default)]
    pub audio_features: HashMap<String, AudioFeatures>,
    /// Keyed by video handle.
    #[serde(default)]
    pub video_features: HashMap<String, VideoFeatures>,
    /// Keyed by item identifier.
    #[serde(default)]
    pub singer_counts: HashMap<String, u32>,
    /// Keyed by video handle.
    #[serde(default)]
    pub optical_flows: HashMap<String, f64>,
    /// Keyed by video handle.
    #[serde(default)]
    pub karaoke: HashMap<String, KaraokeEvidence>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        read_json(path)
    }
}

/// Items ready for detection plus every feature collection.
#[derive(Debug, Clone, Default)]
pub struct LoadedBatch {
    pub items: Vec<Item>,
    pub features: FeatureStore,
    /// Items whose type was set by the karaoke classifier.
    pub tagged: usize,
}

pub fn load_batch(
    manifest_path: &Path,
    features_dir: Option<&Path>,
    config: &DetectorConfig,
) -> Result<LoadedBatch, LoadError> {
    let mut manifest = Manifest::from_path(manifest_path)?;
    if let Some(dir) = features_dir {
        merge_feature_dir(&mut manifest, dir)?;
    }
    build_batch(manifest, config)
}

/// Turns manifest rows into items, rejecting duplicate identifiers, and
/// tags Unknown items that carry karaoke evidence.
pub fn build_batch(manifest: Manifest, config: &DetectorConfig) -> Result<LoadedBatch, LoadError> {
    let features = FeatureStore {
        audio: manifest.audio_features,
        video: manifest.video_features,
        singer_counts: manifest
            .singer_counts
            .into_iter()
            .map(|(id, count)| (ItemId(id), count))
            .collect(),
        optical_flows: manifest.optical_flows,
    };

    let classifier = KaraokeClassifier::new(
        config.karaoke.clone(),
        config.thresholds.optical_flow_threshold,
    );

    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(manifest.items.len());
    let mut tagged = 0;
    for record in manifest.items {
        if !seen.insert(record.id.clone()) {
            return Err(LoadError::DuplicateId(record.id));
        }
        let mut item = Item::from_record(record);

        if item.declared_type == DeclaredType::Unknown {
            let evidence = item
                .video_handle
                .as_ref()
                .and_then(|h| manifest.karaoke.get(h));
            if let Some(evidence) = evidence {
                let flow = features.optical_flow(&item).unwrap_or(0.0);
                let verdict = classifier.classify(evidence, flow);
                log::info!("Tagged item {} as {}", item.id, verdict.kind.label());
                item = item.with_detected_type(verdict.kind.label());
                tagged += 1;
            }
        }
        items.push(item);
    }

    log::info!(
        "Loaded {} items ({} audio, {} video feature records)",
        items.len(),
        features.audio.len(),
        features.video.len()
    );
    Ok(LoadedBatch {
        items,
        features,
        tagged,
    })
}

/// Merges every feature file under `dir` into `manifest`. Files override
/// inline entries with the same handle.
pub fn merge_feature_dir(manifest: &mut Manifest, dir: &Path) -> Result<(), LoadError> {
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(relative) = path
            .strip_prefix(dir)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
        else {
            continue;
        };

        if let Some(handle) = relative.strip_suffix(AUDIO_SUFFIX) {
            manifest
                .audio_features
                .insert(handle.to_string(), read_json(path)?);
        } else if let Some(handle) = relative.strip_suffix(VIDEO_SUFFIX) {
            manifest
                .video_features
                .insert(handle.to_string(), read_json(path)?);
        } else if let Some(handle) = relative.strip_suffix(KARAOKE_SUFFIX) {
            manifest.karaoke.insert(handle.to_string(), read_json(path)?);
        } else {
            log::debug!("Ignoring {}", path.display());
        }
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })
}

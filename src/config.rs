//! Detector configuration.
//!
//! Every recognised option is a typed field with a default, loaded once from
//! TOML and then shared read-only with every component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Hard ceiling on the worker pool regardless of configuration.
pub const MAX_WORKERS_CAP: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub weights: Weights,
    pub thresholds: Thresholds,
    pub grouping: Grouping,
    pub processing: Processing,
    pub karaoke: KaraokeSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub audio: f64,
    pub video: f64,
    /// Declared for compatibility; not used by the fusion blend.
    pub scene: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            audio: 0.4,
            video: 0.4,
            scene: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub audio_similarity: f64,
    pub video_similarity: f64,
    pub combined_similarity: f64,
    pub optical_flow_threshold: f64,
    pub singer_mismatch_penalty: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            audio_similarity: 0.75,
            video_similarity: 0.85,
            combined_similarity: 0.75,
            optical_flow_threshold: 5.0,
            singer_mismatch_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Grouping {
    /// Skip type buckets that hold a single item.
    pub compare_within_same_type_only: bool,
}

impl Default for Grouping {
    fn default() -> Self {
        Self {
            compare_within_same_type_only: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Processing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

impl Processing {
    /// Configured worker count, or `min(12, max(1, cpus - 2))`, capped at 16.
    pub fn workers(&self) -> usize {
        let workers = self
            .max_workers
            .unwrap_or_else(|| num_cpus::get().saturating_sub(2).clamp(1, 12));
        workers.clamp(1, MAX_WORKERS_CAP)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KaraokeSettings {
    /// Fraction of frame height where the lyric region starts.
    pub text_region_start: f64,
    /// Minimum mean OCR confidence for a frame to count as carrying text.
    pub text_confidence: f64,
    /// Fraction of sampled frames that must carry text.
    pub min_text_frame_ratio: f64,
}

impl Default for KaraokeSettings {
    fn default() -> Self {
        Self {
            text_region_start: 0.6,
            text_confidence: 0.5,
            min_text_frame_ratio: 0.3,
        }
    }
}

impl DetectorConfig {
    /// `<config dir>/reuprs/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("reuprs").join("config.toml"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads an explicitly named file, or the default location if it exists,
    /// or falls back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.is_file() => {
                log::info!("Loading configuration from {}", default.display());
                Self::load(&default)
            }
            _ => {
                log::debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_fields = [
            ("weights.audio", self.weights.audio),
            ("weights.video", self.weights.video),
            ("weights.scene", self.weights.scene),
            ("thresholds.audio_similarity", self.thresholds.audio_similarity),
            ("thresholds.video_similarity", self.thresholds.video_similarity),
            (
                "thresholds.combined_similarity",
                self.thresholds.combined_similarity,
            ),
            (
                "thresholds.singer_mismatch_penalty",
                self.thresholds.singer_mismatch_penalty,
            ),
            ("karaoke.text_region_start", self.karaoke.text_region_start),
            ("karaoke.text_confidence", self.karaoke.text_confidence),
            ("karaoke.min_text_frame_ratio", self.karaoke.min_text_frame_ratio),
        ];
        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }

        let flow = self.thresholds.optical_flow_threshold;
        if !flow.is_finite() || flow < 0.0 {
            return Err(ConfigError::Invalid {
                field: "thresholds.optical_flow_threshold",
                reason: format!("{flow} must be a non-negative number"),
            });
        }

        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Invalid {
                field: "processing.max_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.weights.audio, 0.4);
        assert_eq!(config.weights.video, 0.4);
        assert_eq!(config.weights.scene, 0.2);
        assert_eq!(config.thresholds.audio_similarity, 0.75);
        assert_eq!(config.thresholds.video_similarity, 0.85);
        assert_eq!(config.thresholds.combined_similarity, 0.75);
        assert_eq!(config.thresholds.optical_flow_threshold, 5.0);
        assert_eq!(config.thresholds.singer_mismatch_penalty, 0.5);
        assert!(config.grouping.compare_within_same_type_only);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DetectorConfig::from_toml_str(
            r#"
            [thresholds]
            combined_similarity = 0.8

            [processing]
            max_workers = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.thresholds.combined_similarity, 0.8);
        assert_eq!(config.thresholds.audio_similarity, 0.75);
        assert_eq!(config.weights, Weights::default());
        assert_eq!(config.processing.workers(), 4);
    }

    #[test]
    fn test_worker_sizing() {
        let auto = Processing::default().workers();
        assert!((1..=12).contains(&auto));

        let huge = Processing {
            max_workers: Some(64),
        };
        assert_eq!(huge.workers(), MAX_WORKERS_CAP);
    }

    #[test]
    fn test_validation() {
        let mut config = DetectorConfig::default();
        config.thresholds.singer_mismatch_penalty = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "thresholds.singer_mismatch_penalty",
                ..
            })
        ));

        let mut config = DetectorConfig::default();
        config.thresholds.optical_flow_threshold = -1.0;
        assert!(config.validate().is_err());

        let mut config = DetectorConfig::default();
        config.processing.max_workers = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[weights]\naudio = 0.5\nvideo = 0.3\n").unwrap();

        let config = DetectorConfig::load(&path).unwrap();
        assert_eq!(config.weights.audio, 0.5);
        assert_eq!(config.weights.video, 0.3);

        let missing = temp_dir.path().join("missing.toml");
        assert!(matches!(
            DetectorConfig::load_or_default(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_toml_round_trip_is_stable() {
        let config = DetectorConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(DetectorConfig::from_toml_str(&text).unwrap(), config);
    }
}

//! Feature records produced by the external extractors.
//!
//! The numeric content is opaque to this crate: vectors are compared, never
//! recomputed. Records deserialize straight from the extractor's JSON.

use serde::{Deserialize, Serialize};

/// Per-item audio fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Mean MFCC vector.
    pub mfcc: Vec<f64>,
    /// Mean chroma vector.
    pub chroma: Vec<f64>,
    /// Mean spectral-contrast vector.
    pub spectral_contrast: Vec<f64>,
    /// Estimated tempo in BPM.
    pub tempo: f64,
    /// Duration in seconds.
    pub duration: f64,
    #[serde(default)]
    pub remix: RemixDescriptors,
    /// Estimated number of main singers; `None` when unknown.
    #[serde(default)]
    pub singer_count: Option<u32>,
}

/// Mastering/effects descriptors used to tell remixes apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemixDescriptors {
    pub rolloff_mean: f64,
    pub rolloff_std: f64,
    pub zcr_mean: f64,
    pub zcr_std: f64,
    pub bandwidth_mean: f64,
    pub bandwidth_std: f64,
}

/// Per-item visual features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFeatures {
    /// One embedding per keyframe.
    #[serde(default)]
    pub keyframe_embeddings: Vec<Vec<f32>>,
    /// Mean embedding over the keyframes.
    pub global_embedding: Vec<f32>,
    /// Mean optical-flow magnitude.
    pub optical_flow_magnitude: f64,
    #[serde(default)]
    pub frame_count: u32,
    #[serde(default)]
    pub fps: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub scene: Option<SceneDescriptor>,
}

/// Brightness, colour, stability and staging of a video.
///
/// Extractors may send either the labels or the raw measurements behind them
/// (`mean_change`, `is_night`, `has_stage_lighting`); labels win when both
/// are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSceneDescriptor")]
pub struct SceneDescriptor {
    pub brightness: BrightnessStats,
    pub color: ColorProfile,
    pub stability: SceneStability,
    pub performance: PerformanceType,
}

#[derive(Deserialize)]
struct RawSceneDescriptor {
    brightness: BrightnessStats,
    color: ColorProfile,
    #[serde(default)]
    stability: Option<SceneStability>,
    #[serde(default)]
    mean_change: Option<f64>,
    #[serde(default)]
    performance: Option<PerformanceType>,
    #[serde(default)]
    is_night: Option<bool>,
    #[serde(default)]
    has_stage_lighting: Option<bool>,
}

impl TryFrom<RawSceneDescriptor> for SceneDescriptor {
    type Error = String;

    fn try_from(raw: RawSceneDescriptor) -> Result<Self, Self::Error> {
        let stability = match (raw.stability, raw.mean_change) {
            (Some(stability), _) => stability,
            (None, Some(change)) => SceneStability::from_mean_change(change),
            (None, None) => return Err("scene needs `stability` or `mean_change`".to_string()),
        };
        let performance = match (raw.performance, raw.is_night, raw.has_stage_lighting) {
            (Some(performance), _, _) => performance,
            (None, Some(night), Some(stage)) => PerformanceType::classify(night, stage),
            _ => {
                return Err(
                    "scene needs `performance` or both `is_night` and `has_stage_lighting`"
                        .to_string(),
                )
            }
        };
        Ok(SceneDescriptor {
            brightness: raw.brightness,
            color: raw.color,
            stability,
            performance,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrightnessStats {
    /// Mean grey level, 0-255.
    pub mean: f64,
    #[serde(default)]
    pub std: f64,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
}

impl BrightnessStats {
    pub fn category(&self) -> BrightnessCategory {
        BrightnessCategory::from_level(self.mean)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrightnessCategory {
    VeryDark,
    Dark,
    Dim,
    Indoor,
    Bright,
    VeryBright,
}

impl BrightnessCategory {
    pub fn from_level(mean: f64) -> Self {
        match mean {
            m if m < 30.0 => BrightnessCategory::VeryDark,
            m if m < 50.0 => BrightnessCategory::Dark,
            m if m < 70.0 => BrightnessCategory::Dim,
            m if m < 100.0 => BrightnessCategory::Indoor,
            m if m < 150.0 => BrightnessCategory::Bright,
            _ => BrightnessCategory::VeryBright,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorProfile {
    /// Concatenated, normalised R/G/B histograms.
    pub histogram: Vec<f64>,
    #[serde(default)]
    pub red_ratio: f64,
    #[serde(default)]
    pub green_ratio: f64,
    #[serde(default)]
    pub blue_ratio: f64,
}

/// Whether the frames stay on one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneStability {
    Stable,
    Dynamic,
}

impl SceneStability {
    /// Mean frame-to-frame grey difference below 30 counts as one location.
    pub fn from_mean_change(mean_change: f64) -> Self {
        if mean_change < 30.0 {
            SceneStability::Stable
        } else {
            SceneStability::Dynamic
        }
    }
}

/// Staging classification of a performance video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceType {
    NightStage,
    IndoorDark,
    IndoorStage,
    OutdoorBright,
}

impl PerformanceType {
    pub fn classify(is_night: bool, has_stage_lighting: bool) -> Self {
        match (is_night, has_stage_lighting) {
            (true, true) => PerformanceType::NightStage,
            (true, false) => PerformanceType::IndoorDark,
            (false, true) => PerformanceType::IndoorStage,
            (false, false) => PerformanceType::OutdoorBright,
        }
    }
}

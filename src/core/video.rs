use super::features::{SceneDescriptor, VideoFeatures};
use super::{cosine_similarity, scalar_similarity, Comparator, ComparisonError};

const BRIGHTNESS_WEIGHT: f64 = 0.2;
const COLOR_WEIGHT: f64 = 0.3;
const PERFORMANCE_WEIGHT: f64 = 0.3;
const STABILITY_WEIGHT: f64 = 0.2;
const BRIGHTNESS_NORMALIZER: f64 = 100.0;

/// Applied to the whole scene score when staging differs (indoor vs
/// outdoor, day vs night).
const PERFORMANCE_MISMATCH_FACTOR: f64 = 0.2;

/// Scene-level comparison of two videos.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneMatch {
    pub brightness: f64,
    pub color: f64,
    pub same_performance: bool,
    pub stability: f64,
    pub score: f64,
}

impl SceneMatch {
    pub fn verdict(&self) -> &'static str {
        if self.score > 0.7 {
            "likely same performance/location"
        } else if self.score > 0.5 {
            "similar performance conditions"
        } else {
            "different performance/location"
        }
    }
}

/// Embedding cosine similarity fused with scene descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoComparator;

impl VideoComparator {
    pub fn new() -> Self {
        Self
    }

    /// Cosine similarity of the global embeddings remapped to [0, 1].
    pub fn clip_similarity(
        &self,
        a: &VideoFeatures,
        b: &VideoFeatures,
    ) -> Result<f64, ComparisonError> {
        let cos = cosine_similarity("global_embedding", &a.global_embedding, &b.global_embedding)?;
        Ok((cos + 1.0) / 2.0)
    }

    pub fn compare_scenes(
        &self,
        a: &SceneDescriptor,
        b: &SceneDescriptor,
    ) -> Result<SceneMatch, ComparisonError> {
        if !a.brightness.mean.is_finite() || !b.brightness.mean.is_finite() {
            return Err(ComparisonError::NonFinite {
                field: "brightness",
            });
        }
        let brightness =
            scalar_similarity(a.brightness.mean, b.brightness.mean, BRIGHTNESS_NORMALIZER);
        let color = histogram_correlation(&a.color.histogram, &b.color.histogram)?.max(0.0);
        let same_performance = a.performance == b.performance;
        let stability = if a.stability == b.stability { 1.0 } else { 0.5 };

        let mut score = BRIGHTNESS_WEIGHT * brightness
            + COLOR_WEIGHT * color
            + if same_performance { PERFORMANCE_WEIGHT } else { 0.0 }
            + STABILITY_WEIGHT * stability;
        if !same_performance {
            score *= PERFORMANCE_MISMATCH_FACTOR;
        }

        Ok(SceneMatch {
            brightness,
            color,
            same_performance,
            stability,
            score,
        })
    }
}

impl Comparator for VideoComparator {
    type Features = VideoFeatures;

    fn modality(&self) -> &'static str {
        "video"
    }

    fn compare(&self, a: &VideoFeatures, b: &VideoFeatures) -> Result<f64, ComparisonError> {
        let clip = self.clip_similarity(a, b)?;

        let (Some(scene_a), Some(scene_b)) = (&a.scene, &b.scene) else {
            log::debug!("Video similarity (embedding only): {:.3}", clip);
            return Ok(clip.clamp(0.0, 1.0));
        };

        let scene = self.compare_scenes(scene_a, scene_b)?;
        let (clip_weight, scene_weight) = fusion_weights(clip);
        let similarity = clip_weight * clip + scene_weight * scene.score;

        log::debug!(
            "Video similarity: clip={:.3}, scene={:.3}, final={:.3} ({:?} vs {:?}, {})",
            clip,
            scene.score,
            similarity,
            scene_a.brightness.category(),
            scene_b.brightness.category(),
            scene.verdict()
        );
        Ok(similarity.clamp(0.0, 1.0))
    }
}

/// Embedding/scene weights; the more certain the embedding, the less the
/// scene descriptors count.
fn fusion_weights(clip: f64) -> (f64, f64) {
    if clip > 0.95 {
        (0.8, 0.2)
    } else if clip > 0.85 {
        (0.7, 0.3)
    } else {
        (0.6, 0.4)
    }
}

/// Pearson correlation of two histograms in [-1, 1].
///
/// Two flat histograms correlate perfectly.
pub fn histogram_correlation(a: &[f64], b: &[f64]) -> Result<f64, ComparisonError> {
    const FIELD: &str = "color_histogram";
    if a.is_empty() || b.is_empty() {
        return Err(ComparisonError::EmptyVector { field: FIELD });
    }
    if a.len() != b.len() {
        return Err(ComparisonError::DimensionMismatch {
            field: FIELD,
            left: a.len(),
            right: b.len(),
        });
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(ComparisonError::NonFinite { field: FIELD });
    }

    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        num += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = var_a * var_b;
    if denom.abs() <= f64::EPSILON {
        return Ok(1.0);
    }
    Ok((num / denom.sqrt()).clamp(-1.0, 1.0))
}

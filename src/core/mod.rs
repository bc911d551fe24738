// Pure detection logic: no file or network access below this module.
pub mod audio;
pub mod cluster;
pub mod detector;
pub mod features;
pub mod fusion;
pub mod item;
pub mod karaoke;
pub mod matrix;
pub mod stats;
pub mod video;

use thiserror::Error;

/// Internal failure of a pairwise comparator.
///
/// Never leaves a comparator's `similarity` entry point; the pair is scored
/// 0.0 instead.
#[derive(Debug, Error, PartialEq)]
pub enum ComparisonError {
    #[error("{field}: dimension mismatch ({left} vs {right})")]
    DimensionMismatch {
        field: &'static str,
        left: usize,
        right: usize,
    },

    #[error("{field}: empty vector")]
    EmptyVector { field: &'static str },

    #[error("{field}: zero-norm vector")]
    ZeroNorm { field: &'static str },

    #[error("{field}: non-finite value")]
    NonFinite { field: &'static str },
}

/// A pairwise similarity function over one modality's features.
pub trait Comparator {
    type Features;

    /// Short modality name used in logs.
    fn modality(&self) -> &'static str;

    fn compare(&self, a: &Self::Features, b: &Self::Features) -> Result<f64, ComparisonError>;

    /// Fail-closed similarity in [0, 1].
    fn similarity(&self, a: &Self::Features, b: &Self::Features) -> f64 {
        match self.compare(a, b) {
            Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
            Ok(_) => {
                log::error!("{} comparison produced a non-finite score", self.modality());
                0.0
            }
            Err(e) => {
                log::error!("Failed to compare {} features: {}", self.modality(), e);
                0.0
            }
        }
    }
}

/// Cosine similarity in [-1, 1].
pub(crate) fn cosine_similarity<T>(
    field: &'static str,
    a: &[T],
    b: &[T],
) -> Result<f64, ComparisonError>
where
    T: Copy + Into<f64>,
{
    if a.is_empty() || b.is_empty() {
        return Err(ComparisonError::EmptyVector { field });
    }
    if a.len() != b.len() {
        return Err(ComparisonError::DimensionMismatch {
            field,
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    let mut identical = true;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y): (f64, f64) = (x.into(), y.into());
        if !x.is_finite() || !y.is_finite() {
            return Err(ComparisonError::NonFinite { field });
        }
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
        identical &= x == y;
    }

    // two silent vectors are the same signal
    if identical && norm_a <= f64::EPSILON {
        return Ok(1.0);
    }
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return Err(ComparisonError::ZeroNorm { field });
    }
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// `max(0, 1 - |a - b| / normalizer)`
pub(crate) fn scalar_similarity(a: f64, b: f64, normalizer: f64) -> f64 {
    (1.0 - (a - b).abs() / normalizer).max(0.0)
}

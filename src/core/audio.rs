use super::features::AudioFeatures;
use super::{cosine_similarity, scalar_similarity, Comparator, ComparisonError};

const MFCC_WEIGHT: f64 = 0.50;
const CHROMA_WEIGHT: f64 = 0.25;
const SPECTRAL_WEIGHT: f64 = 0.15;
const TEMPO_WEIGHT: f64 = 0.10;

const TEMPO_NORMALIZER: f64 = 100.0;
const ROLLOFF_NORMALIZER: f64 = 2000.0;
const ZCR_NORMALIZER: f64 = 0.05;
const BANDWIDTH_NORMALIZER: f64 = 1000.0;

// Fires only on gross tempo disagreement with weak harmonic overlap, so
// half/double tempo estimates alone never trigger it.
const TEMPO_DISCREPANCY_RATIO: f64 = 0.40;
const TEMPO_DISCREPANCY_CHROMA: f64 = 0.50;
const TEMPO_DISCREPANCY_FACTOR: f64 = 0.85;

/// Every intermediate score of one audio comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioScore {
    pub mfcc: f64,
    pub chroma: f64,
    pub spectral: f64,
    pub tempo: f64,
    pub base: f64,
    pub remix: f64,
    pub remix_penalty: f64,
    pub tempo_penalty: bool,
    pub similarity: f64,
}

/// Weighted MFCC/chroma/contrast/tempo comparison with remix penalties.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioComparator;

impl AudioComparator {
    pub fn new() -> Self {
        Self
    }

    pub fn score(
        &self,
        a: &AudioFeatures,
        b: &AudioFeatures,
    ) -> Result<AudioScore, ComparisonError> {
        let mfcc = cosine_similarity("mfcc", &a.mfcc, &b.mfcc)?;
        let chroma = cosine_similarity("chroma", &a.chroma, &b.chroma)?;
        let spectral =
            cosine_similarity("spectral_contrast", &a.spectral_contrast, &b.spectral_contrast)?;

        for (field, value) in [
            ("tempo", a.tempo),
            ("tempo", b.tempo),
            ("rolloff_mean", a.remix.rolloff_mean),
            ("rolloff_mean", b.remix.rolloff_mean),
            ("zcr_mean", a.remix.zcr_mean),
            ("zcr_mean", b.remix.zcr_mean),
            ("bandwidth_mean", a.remix.bandwidth_mean),
            ("bandwidth_mean", b.remix.bandwidth_mean),
        ] {
            if !value.is_finite() {
                return Err(ComparisonError::NonFinite { field });
            }
        }

        let tempo = scalar_similarity(a.tempo, b.tempo, TEMPO_NORMALIZER);
        let base = MFCC_WEIGHT * mfcc
            + CHROMA_WEIGHT * chroma
            + SPECTRAL_WEIGHT * spectral
            + TEMPO_WEIGHT * tempo;

        let remix = remix_similarity(a, b);
        let remix_penalty = remix_penalty(remix, base);
        let mut similarity = base * remix_penalty;

        let tempo_penalty = relative_tempo_difference(a.tempo, b.tempo) > TEMPO_DISCREPANCY_RATIO
            && chroma < TEMPO_DISCREPANCY_CHROMA;
        if tempo_penalty {
            similarity *= TEMPO_DISCREPANCY_FACTOR;
        }

        Ok(AudioScore {
            mfcc,
            chroma,
            spectral,
            tempo,
            base,
            remix,
            remix_penalty,
            tempo_penalty,
            similarity: similarity.clamp(0.0, 1.0),
        })
    }
}

impl Comparator for AudioComparator {
    type Features = AudioFeatures;

    fn modality(&self) -> &'static str {
        "audio"
    }

    fn compare(&self, a: &AudioFeatures, b: &AudioFeatures) -> Result<f64, ComparisonError> {
        let score = self.score(a, b)?;
        if score.remix_penalty < 1.0 {
            log::debug!(
                "Remix penalty {:.2} (remix={:.3}, base={:.3}; mfcc={:.3} chroma={:.3} spectral={:.3} tempo={:.3})",
                score.remix_penalty,
                score.remix,
                score.base,
                score.mfcc,
                score.chroma,
                score.spectral,
                score.tempo
            );
        }
        if score.tempo_penalty {
            log::debug!(
                "Tempo discrepancy penalty ({:.1} vs {:.1} BPM, chroma={:.3})",
                a.tempo,
                b.tempo,
                score.chroma
            );
        }
        Ok(score.similarity)
    }
}

/// Mean of the rolloff, zero-crossing and bandwidth similarities.
pub fn remix_similarity(a: &AudioFeatures, b: &AudioFeatures) -> f64 {
    let rolloff = scalar_similarity(
        a.remix.rolloff_mean,
        b.remix.rolloff_mean,
        ROLLOFF_NORMALIZER,
    );
    let zcr = scalar_similarity(a.remix.zcr_mean, b.remix.zcr_mean, ZCR_NORMALIZER);
    let bandwidth = scalar_similarity(
        a.remix.bandwidth_mean,
        b.remix.bandwidth_mean,
        BANDWIDTH_NORMALIZER,
    );
    (rolloff + zcr + bandwidth) / 3.0
}

/// Multiplier applied to the base similarity for a given remix signature.
///
/// Strong core similarity softens the penalty. The penalty never grows as
/// the remix signatures move further apart.
pub fn remix_penalty(remix: f64, base: f64) -> f64 {
    if remix > 0.85 {
        1.0
    } else if remix > 0.60 {
        // a closer remix signature is never punished harder than a further one
        0.80_f64.max(moderate_remix_penalty(base))
    } else if remix > 0.40 {
        moderate_remix_penalty(base)
    } else {
        graded(base, [0.80, 0.70, 0.60, 0.35])
    }
}

fn moderate_remix_penalty(base: f64) -> f64 {
    graded(base, [0.90, 0.80, 0.70, 0.50])
}

fn graded(base: f64, steps: [f64; 4]) -> f64 {
    if base > 0.85 {
        steps[0]
    } else if base > 0.80 {
        steps[1]
    } else if base > 0.75 {
        steps[2]
    } else {
        steps[3]
    }
}

fn relative_tempo_difference(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.max(b).max(1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::RemixDescriptors;

    fn features(mfcc: Vec<f64>, chroma: Vec<f64>, tempo: f64) -> AudioFeatures {
        AudioFeatures {
            mfcc,
            chroma,
            spectral_contrast: vec![20.0, 15.0, 17.0, 18.0, 19.0, 21.0, 40.0],
            tempo,
            duration: 60.0,
            remix: RemixDescriptors {
                rolloff_mean: 4000.0,
                rolloff_std: 300.0,
                zcr_mean: 0.08,
                zcr_std: 0.01,
                bandwidth_mean: 2200.0,
                bandwidth_std: 150.0,
            },
            singer_count: Some(1),
        }
    }

    fn sample() -> AudioFeatures {
        features(
            vec![-200.0, 120.0, -10.0, 30.0, 5.0],
            vec![0.3, 0.5, 0.2, 0.8, 0.1, 0.4, 0.6, 0.2, 0.3, 0.5, 0.7, 0.1],
            120.0,
        )
    }

    #[test]
    fn test_self_similarity_is_one() {
        let a = sample();
        let score = AudioComparator::new().similarity(&a, &a);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_silent_chroma_matches_itself() {
        let a = features(vec![-200.0, 120.0, -10.0], vec![0.0; 12], 120.0);
        let score = AudioComparator::new().similarity(&a, &a);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch_fails_closed() {
        let a = sample();
        let mut b = sample();
        b.mfcc.push(1.0);
        let comparator = AudioComparator::new();
        assert!(comparator.compare(&a, &b).is_err());
        assert_eq!(comparator.similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_non_finite_tempo_fails_closed() {
        let a = sample();
        let mut b = sample();
        b.tempo = f64::NAN;
        assert_eq!(AudioComparator::new().similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_remix_penalty_table() {
        assert_eq!(remix_penalty(0.90, 0.50), 1.0);
        assert_eq!(remix_penalty(0.70, 0.50), 0.80);
        assert_eq!(remix_penalty(0.50, 0.90), 0.90);
        assert_eq!(remix_penalty(0.50, 0.82), 0.80);
        assert_eq!(remix_penalty(0.50, 0.78), 0.70);
        assert_eq!(remix_penalty(0.50, 0.60), 0.50);
        assert_eq!(remix_penalty(0.20, 0.90), 0.80);
        assert_eq!(remix_penalty(0.20, 0.82), 0.70);
        assert_eq!(remix_penalty(0.20, 0.78), 0.60);
        assert_eq!(remix_penalty(0.20, 0.60), 0.35);
    }

    #[test]
    fn test_remix_penalty_is_monotonic() {
        let bases = [0.3, 0.6, 0.76, 0.79, 0.81, 0.84, 0.86, 0.95, 1.0];
        for base in bases {
            let mut previous = f64::INFINITY;
            for step in (0..=100).rev() {
                let remix = step as f64 / 100.0;
                let penalty = remix_penalty(remix, base);
                assert!(
                    penalty <= previous,
                    "penalty rose from {previous} to {penalty} at remix={remix}, base={base}"
                );
                previous = penalty;
            }
        }
    }

    #[test]
    fn test_different_mastering_is_penalised() {
        let a = sample();
        let mut b = sample();
        b.remix.rolloff_mean += 1600.0;
        b.remix.zcr_mean += 0.04;
        b.remix.bandwidth_mean += 900.0;

        let score = AudioComparator::new().score(&a, &b).unwrap();
        assert!(score.remix < 0.40);
        assert!((score.base - 1.0).abs() < 1e-9);
        assert_eq!(score.remix_penalty, 0.80);
        assert!((score.similarity - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_discrepancy_penalty() {
        let a = sample();
        // chroma orthogonal-ish and tempo far apart
        let b = features(
            a.mfcc.clone(),
            vec![0.0, 0.0, 0.9, 0.0, 0.0, 0.0, 0.0, 0.9, 0.0, 0.0, 0.0, 0.0],
            60.0,
        );
        let score = AudioComparator::new().score(&a, &b).unwrap();
        assert!(score.chroma < 0.5);
        assert!(score.tempo_penalty);

        let c = features(a.mfcc.clone(), a.chroma.clone(), 60.0);
        assert!(!AudioComparator::new().score(&a, &c).unwrap().tempo_penalty);
    }

    #[test]
    fn test_range_under_adversarial_input() {
        let a = sample();
        let mut b = sample();
        b.mfcc.iter_mut().for_each(|v| *v = -*v);
        b.chroma.iter_mut().for_each(|v| *v = -*v);
        b.tempo = 10_000.0;
        let score = AudioComparator::new().similarity(&a, &b);
        assert!((0.0..=1.0).contains(&score));
    }
}

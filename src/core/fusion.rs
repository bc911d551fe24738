//! Audio/video score fusion with type-aware gating.
//!
//! Per pair of Video/Karaoke items, in order:
//!
//! 1. static override: both items nearly motionless, keep the video score
//!    if it reaches [`STATIC_VIDEO_FLOOR`], otherwise zero (final)
//! 2. weighted blend of the audio and video scores
//! 3. gentle gate on weak audio
//! 4. per-type gate on the raw scores (may zero the pair)
//! 5. boost floor for near-certain matches
//! 6. singer-count mismatch penalty

use super::item::{DeclaredType, ItemId};
use super::matrix::SimilarityMatrix;
use crate::config::DetectorConfig;
use std::collections::HashMap;

/// Minimum video score a static pair needs to be kept.
pub const STATIC_VIDEO_FLOOR: f64 = 0.80;
pub const GENTLE_GATE_AUDIO: f64 = 0.60;
pub const GENTLE_GATE_FACTOR: f64 = 0.85;
/// Audio score every gated Video/Karaoke pair must reach.
pub const GATE_AUDIO: f64 = 0.65;
pub const KARAOKE_ACCEPT_VIDEO: f64 = 0.92;
pub const KARAOKE_GATE_VIDEO: f64 = 0.85;
pub const BOOST_AUDIO: f64 = 0.96;
pub const BOOST_VIDEO: f64 = 0.85;
pub const BOOST_FLOOR: f64 = 0.85;
/// Combined threshold used for a group that contains a static pair.
pub const RELAXED_STATIC_THRESHOLD: f64 = 0.70;

/// Per-item signals the fusion rules key on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemTraits {
    pub declared_type: DeclaredType,
    pub optical_flow: Option<f64>,
    /// `None` when unknown; never zero.
    pub singer_count: Option<u32>,
}

impl Default for ItemTraits {
    fn default() -> Self {
        Self {
            declared_type: DeclaredType::Unknown,
            optical_flow: None,
            singer_count: None,
        }
    }
}

/// Which matrices produced a fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionSource {
    Combined,
    AudioOnly,
    VideoOnly,
    /// Modalities disagreed on membership; the larger matrix was kept.
    SizeMismatch,
}

#[derive(Debug, Clone)]
pub struct FusedMatrix {
    pub matrix: SimilarityMatrix,
    pub source: FusionSource,
    pub static_pairs: usize,
    pub boosted_pairs: usize,
    pub rejected_pairs: usize,
    pub singer_penalties: usize,
}

pub struct FusionEngine<'a> {
    config: &'a DetectorConfig,
}

impl<'a> FusionEngine<'a> {
    pub fn new(config: &'a DetectorConfig) -> Self {
        Self { config }
    }

    pub fn is_static_pair(&self, a: &ItemTraits, b: &ItemTraits) -> bool {
        let cutoff = self.config.thresholds.optical_flow_threshold;
        matches!(
            (a.optical_flow, b.optical_flow),
            (Some(fa), Some(fb)) if fa < cutoff && fb < cutoff
        )
    }

    /// Number of pairs among `ids` where both items are nearly motionless.
    pub fn count_static_pairs(&self, ids: &[ItemId], traits: &HashMap<ItemId, ItemTraits>) -> usize {
        let traits: Vec<ItemTraits> = ids.iter().map(|id| lookup(traits, id)).collect();
        let mut count = 0;
        for i in 0..traits.len() {
            for j in (i + 1)..traits.len() {
                if self.is_static_pair(&traits[i], &traits[j]) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Combined threshold for a set of Video/Karaoke items.
    pub fn effective_threshold(&self, static_pairs: usize) -> f64 {
        if static_pairs > 0 {
            log::info!(
                "Found {} static image pairs, using threshold {:.2}",
                static_pairs,
                RELAXED_STATIC_THRESHOLD
            );
            RELAXED_STATIC_THRESHOLD
        } else {
            self.config.thresholds.combined_similarity
        }
    }

    /// Multiplies every pair with differing known singer counts by the
    /// configured penalty. Returns the number of penalised pairs.
    pub fn apply_singer_penalty(
        &self,
        matrix: &mut SimilarityMatrix,
        traits: &HashMap<ItemId, ItemTraits>,
    ) -> usize {
        let penalty = self.config.thresholds.singer_mismatch_penalty;
        let counts: Vec<Option<u32>> = matrix
            .ids()
            .iter()
            .map(|id| lookup(traits, id).singer_count)
            .collect();

        let mut penalised = 0;
        for i in 0..matrix.len() {
            for j in (i + 1)..matrix.len() {
                if let Some((si, sj)) = singer_mismatch(counts[i], counts[j]) {
                    let old = matrix.get(i, j);
                    matrix.set_symmetric(i, j, old * penalty);
                    penalised += 1;
                    log::debug!(
                        "Singer penalty [{} <-> {}]: {} vs {} singers, {:.3} -> {:.3}",
                        matrix.ids()[i],
                        matrix.ids()[j],
                        si,
                        sj,
                        old,
                        old * penalty
                    );
                }
            }
        }
        penalised
    }

    /// Fuses the audio and video matrices of one set of Video/Karaoke items.
    ///
    /// With a single non-empty modality that matrix is returned unchanged.
    /// When the two disagree on membership the larger one is returned
    /// unchanged, video on a tie.
    pub fn fuse(
        &self,
        audio: &SimilarityMatrix,
        video: &SimilarityMatrix,
        traits: &HashMap<ItemId, ItemTraits>,
    ) -> FusedMatrix {
        let passthrough = |matrix: &SimilarityMatrix, source| FusedMatrix {
            matrix: matrix.clone(),
            source,
            static_pairs: 0,
            boosted_pairs: 0,
            rejected_pairs: 0,
            singer_penalties: 0,
        };

        if video.is_empty() {
            log::warn!("No video features available, using audio only");
            return passthrough(audio, FusionSource::AudioOnly);
        }
        if audio.is_empty() {
            log::warn!("No audio features available, using video only");
            return passthrough(video, FusionSource::VideoOnly);
        }
        if !audio.index().same_members(video.index()) {
            log::error!(
                "Matrix size mismatch: audio={}x{}, video={}x{}",
                audio.len(),
                audio.len(),
                video.len(),
                video.len()
            );
            let larger = if video.len() >= audio.len() { video } else { audio };
            return passthrough(larger, FusionSource::SizeMismatch);
        }

        let mut fused = FusedMatrix {
            matrix: SimilarityMatrix::identity(video.index().clone()),
            source: FusionSource::Combined,
            static_pairs: 0,
            boosted_pairs: 0,
            rejected_pairs: 0,
            singer_penalties: 0,
        };

        for i in 0..video.len() {
            for j in (i + 1)..video.len() {
                let (id_i, id_j) = (&video.ids()[i], &video.ids()[j]);
                let v = video.get(i, j);
                let a = audio.get_by_id(id_i, id_j).unwrap_or(0.0);
                let ti = lookup(traits, id_i);
                let tj = lookup(traits, id_j);
                let score = self.fuse_pair(id_i, id_j, a, v, &ti, &tj, &mut fused);
                fused.matrix.set_symmetric(i, j, score);
            }
        }

        if fused.static_pairs > 0 {
            log::info!(
                "Adjusted {} static pairs (using video-only similarity)",
                fused.static_pairs
            );
        }
        log::info!(
            "Combined matrix created: {}x{} ({} rejected, {} boosted, {} singer penalties)",
            fused.matrix.len(),
            fused.matrix.len(),
            fused.rejected_pairs,
            fused.boosted_pairs,
            fused.singer_penalties
        );
        fused
    }

    #[allow(clippy::too_many_arguments)]
    fn fuse_pair(
        &self,
        id_i: &ItemId,
        id_j: &ItemId,
        a: f64,
        v: f64,
        ti: &ItemTraits,
        tj: &ItemTraits,
        stats: &mut FusedMatrix,
    ) -> f64 {
        if self.is_static_pair(ti, tj) {
            stats.static_pairs += 1;
            log::debug!(
                "Static image pair [{} <-> {}]: video={:.3} -> video-only",
                id_i,
                id_j,
                v
            );
            return if v >= STATIC_VIDEO_FLOOR { v } else { 0.0 };
        }

        let weights = &self.config.weights;
        let mut score = weights.audio * a + weights.video * v;
        if a < GENTLE_GATE_AUDIO {
            score *= GENTLE_GATE_FACTOR;
            log::debug!(
                "Gentle audio gate [{} <-> {}]: audio={:.3} < {:.2}",
                id_i,
                id_j,
                a,
                GENTLE_GATE_AUDIO
            );
        }

        if !self.passes_type_gate(id_i, id_j, a, v, ti, tj) {
            stats.rejected_pairs += 1;
            return 0.0;
        }

        if a >= BOOST_AUDIO && v >= BOOST_VIDEO && score < BOOST_FLOOR {
            log::info!(
                "Boost applied [{} <-> {}]: audio={:.3}, video={:.3}, combined {:.3} -> {:.3}",
                id_i,
                id_j,
                a,
                v,
                score,
                BOOST_FLOOR
            );
            score = BOOST_FLOOR;
            stats.boosted_pairs += 1;
        }

        if let Some((si, sj)) = singer_mismatch(ti.singer_count, tj.singer_count) {
            let penalty = self.config.thresholds.singer_mismatch_penalty;
            log::info!(
                "Singer penalty [{} <-> {}]: {} vs {} singers, combined {:.3} -> {:.3}",
                id_i,
                id_j,
                si,
                sj,
                score,
                score * penalty
            );
            score *= penalty;
            stats.singer_penalties += 1;
        }

        score
    }

    fn passes_type_gate(
        &self,
        id_i: &ItemId,
        id_j: &ItemId,
        a: f64,
        v: f64,
        ti: &ItemTraits,
        tj: &ItemTraits,
    ) -> bool {
        let karaoke_pair = ti.declared_type == DeclaredType::Karaoke
            && tj.declared_type == DeclaredType::Karaoke;

        if karaoke_pair {
            if v >= KARAOKE_ACCEPT_VIDEO {
                log::debug!(
                    "Karaoke accepted (high video) [{} <-> {}]: audio={:.3}, video={:.3}",
                    id_i,
                    id_j,
                    a,
                    v
                );
                return true;
            }
            let passed = a >= GATE_AUDIO && v >= KARAOKE_GATE_VIDEO;
            log::debug!(
                "Karaoke {} [{} <-> {}]: audio={:.3} (need {:.2}), video={:.3} (need {:.2})",
                if passed { "accepted" } else { "rejected" },
                id_i,
                id_j,
                a,
                GATE_AUDIO,
                v,
                KARAOKE_GATE_VIDEO
            );
            return passed;
        }

        let video_threshold = self.config.thresholds.video_similarity;
        let passed = a >= GATE_AUDIO && v >= video_threshold;
        log::debug!(
            "Video gate {} [{} <-> {}]: audio={:.3} (need {:.2}), video={:.3} (need {:.2})",
            if passed { "passed" } else { "rejected" },
            id_i,
            id_j,
            a,
            GATE_AUDIO,
            v,
            video_threshold
        );
        passed
    }
}

fn lookup(traits: &HashMap<ItemId, ItemTraits>, id: &ItemId) -> ItemTraits {
    traits.get(id).copied().unwrap_or_default()
}

fn singer_mismatch(a: Option<u32>, b: Option<u32>) -> Option<(u32, u32)> {
    match (a, b) {
        (Some(a), Some(b)) if a > 0 && b > 0 && a != b => Some((a, b)),
        _ => None,
    }
}

use super::item::ItemId;
use super::Comparator;
use std::collections::{HashMap, HashSet};

/// Width of the "near miss" band below a threshold.
const NEAR_MISS_BAND: f64 = 0.10;
const TOP_SCORES: usize = 5;

/// Ordered item identifiers with reverse lookup.
///
/// Travels with every matrix; positions are only meaningful against the
/// index they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemIndex {
    ids: Vec<ItemId>,
    positions: HashMap<ItemId, usize>,
}

impl ItemIndex {
    /// Later duplicates of an identifier are ignored.
    pub fn new<I: IntoIterator<Item = ItemId>>(ids: I) -> Self {
        let mut index = Self::default();
        for id in ids {
            if !index.positions.contains_key(&id) {
                index.positions.insert(id.clone(), index.ids.len());
                index.ids.push(id);
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[ItemId] {
        &self.ids
    }

    pub fn id(&self, position: usize) -> Option<&ItemId> {
        self.ids.get(position)
    }

    pub fn position(&self, id: &ItemId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.positions.contains_key(id)
    }

    /// Same identifiers regardless of order.
    pub fn same_members(&self, other: &ItemIndex) -> bool {
        self.len() == other.len() && self.ids.iter().all(|id| other.contains(id))
    }
}

/// Dense symmetric similarity matrix with unit diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    index: ItemIndex,
    values: Vec<f64>,
}

impl SimilarityMatrix {
    /// Identity matrix over `index`.
    pub fn identity(index: ItemIndex) -> Self {
        let n = index.len();
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            values[i * n + i] = 1.0;
        }
        Self { index, values }
    }

    pub fn empty() -> Self {
        Self::identity(ItemIndex::default())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &ItemIndex {
        &self.index
    }

    pub fn ids(&self) -> &[ItemId] {
        self.index.ids()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.len() + j]
    }

    /// Writes `(i, j)` and `(j, i)`; values are clamped to [0, 1] and the
    /// diagonal is left untouched.
    pub fn set_symmetric(&mut self, i: usize, j: usize, value: f64) {
        if i == j {
            return;
        }
        let n = self.len();
        let value = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.values[i * n + j] = value;
        self.values[j * n + i] = value;
    }

    pub fn get_by_id(&self, a: &ItemId, b: &ItemId) -> Option<f64> {
        let i = self.index.position(a)?;
        let j = self.index.position(b)?;
        Some(self.get(i, j))
    }

    /// Restriction to `ids`, in the given order. Identifiers absent from
    /// this matrix are dropped.
    pub fn submatrix(&self, ids: &[ItemId]) -> SimilarityMatrix {
        let positions: Vec<(ItemId, usize)> = ids
            .iter()
            .filter_map(|id| self.index.position(id).map(|p| (id.clone(), p)))
            .collect();
        let index = ItemIndex::new(positions.iter().map(|(id, _)| id.clone()));
        let mut sub = SimilarityMatrix::identity(index);
        for (a, (_, pa)) in positions.iter().enumerate() {
            for (b, (_, pb)) in positions.iter().enumerate().skip(a + 1) {
                sub.set_symmetric(a, b, self.get(*pa, *pb));
            }
        }
        sub
    }

    /// Strict upper triangle as `(i, j, value)`.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let n = self.len();
        (0..n).flat_map(move |i| ((i + 1)..n).map(move |j| (i, j, self.get(i, j))))
    }

    pub fn stats(&self, threshold: f64) -> MatrixStats {
        let mut scores: Vec<f64> = self.pairs().map(|(_, _, v)| v).collect();
        let pairs = scores.len();
        let above_threshold = scores.iter().filter(|&&v| v >= threshold).count();

        let mut near_misses: Vec<(ItemId, ItemId, f64)> = self
            .pairs()
            .filter(|&(_, _, v)| v < threshold && v >= threshold - NEAR_MISS_BAND)
            .map(|(i, j, v)| (self.ids()[i].clone(), self.ids()[j].clone(), v))
            .collect();
        near_misses.sort_by(|a, b| b.2.total_cmp(&a.2));

        scores.sort_by(|a, b| b.total_cmp(a));
        let (max, min, mean) = if scores.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                scores[0],
                scores[pairs - 1],
                scores.iter().sum::<f64>() / pairs as f64,
            )
        };
        scores.truncate(TOP_SCORES);

        MatrixStats {
            pairs,
            max,
            min,
            mean,
            threshold,
            above_threshold,
            top: scores,
            near_misses,
        }
    }
}

/// Summary of a matrix's off-diagonal scores against a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixStats {
    pub pairs: usize,
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    pub threshold: f64,
    pub above_threshold: usize,
    /// Highest scores, descending.
    pub top: Vec<f64>,
    /// Pairs scoring within 0.10 below the threshold, descending.
    pub near_misses: Vec<(ItemId, ItemId, f64)>,
}

impl MatrixStats {
    pub fn log(&self, label: &str) {
        if self.pairs == 0 {
            return;
        }
        log::info!(
            "{} similarity: max={:.3}, min={:.3}, mean={:.3}, pairs >= {:.2}: {}/{}",
            label,
            self.max,
            self.min,
            self.mean,
            self.threshold,
            self.above_threshold,
            self.pairs
        );
        log::debug!("{} top similarities: {:.3?}", label, self.top);
        for (a, b, score) in self.near_misses.iter().take(3) {
            log::info!(
                "{} near threshold [{} <-> {}]: {:.3} (short by {:.3})",
                label,
                a,
                b,
                score,
                self.threshold - score
            );
        }
        if self.above_threshold == 0 {
            log::warn!(
                "{}: no pairs reach {:.2}, highest is {:.3}",
                label,
                self.threshold,
                self.max
            );
        }
    }
}

/// Pairwise matrix over the identifiers in `ids` that have features.
///
/// Identifiers without features are left out of the resulting index.
pub fn build_matrix<'a, C, F>(comparator: &C, ids: &[ItemId], lookup: F) -> SimilarityMatrix
where
    C: Comparator,
    C::Features: 'a,
    F: Fn(&ItemId) -> Option<&'a C::Features>,
{
    let mut seen = HashSet::new();
    let present: Vec<(&ItemId, &C::Features)> = ids
        .iter()
        .filter(|id| seen.insert(*id))
        .filter_map(|id| lookup(id).map(|f| (id, f)))
        .collect();
    if seen.len() != ids.len() {
        log::warn!("Duplicate identifiers passed to the {} matrix", comparator.modality());
    }
    let index = ItemIndex::new(present.iter().map(|(id, _)| (*id).clone()));

    let mut matrix = SimilarityMatrix::identity(index);
    for i in 0..matrix.len() {
        for j in (i + 1)..matrix.len() {
            let score = comparator.similarity(present[i].1, present[j].1);
            matrix.set_symmetric(i, j, score);
        }
    }
    log::debug!(
        "Built {} matrix: {}x{} ({} of {} items had features)",
        comparator.modality(),
        matrix.len(),
        matrix.len(),
        present.len(),
        ids.len()
    );
    matrix
}

use super::item::{DeclaredType, Item, ItemId};
use super::matrix::SimilarityMatrix;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Item reference as reported inside a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: ItemId,
    pub source: String,
    pub declared_type: DeclaredType,
    pub type_label: String,
    pub upload_date: String,
}

impl From<&Item> for ClusterMember {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            source: item.source.clone(),
            declared_type: item.declared_type,
            type_label: item.type_label.clone(),
            upload_date: item.upload_date.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reupload {
    pub item: ClusterMember,
    /// Score against the cluster's original.
    pub similarity: f64,
}

/// One connected component with its designated original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReuploadCluster {
    pub code: String,
    pub original: ClusterMember,
    pub reuploads: Vec<Reupload>,
    pub dominant_type: String,
    /// Threshold the component was cut at.
    pub threshold: f64,
}

impl ReuploadCluster {
    pub fn size(&self) -> usize {
        self.reuploads.len() + 1
    }

    pub fn mean_similarity(&self) -> f64 {
        if self.reuploads.is_empty() {
            return 0.0;
        }
        self.reuploads.iter().map(|r| r.similarity).sum::<f64>() / self.reuploads.len() as f64
    }

    pub fn members(&self) -> impl Iterator<Item = &ClusterMember> {
        std::iter::once(&self.original).chain(self.reuploads.iter().map(|r| &r.item))
    }
}

/// Connected components of the graph with an edge wherever the score
/// reaches `threshold`. Components are returned in order of their lowest
/// index, members ascending; singletons are dropped.
pub fn connected_components(matrix: &SimilarityMatrix, threshold: f64) -> Vec<Vec<usize>> {
    let n = matrix.len();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut edges = 0;
    for (i, j, score) in matrix.pairs() {
        if score >= threshold {
            adjacency[i].push(j);
            adjacency[j].push(i);
            edges += 1;
            log::debug!(
                "Edge added: {} <-> {} (similarity: {:.3})",
                matrix.ids()[i],
                matrix.ids()[j],
                score
            );
        }
    }
    log::debug!("Graph built: {} edges (pairs >= {:.2})", edges, threshold);

    let mut visited = vec![false; n];
    let mut components = Vec::new();
    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        visited[start] = true;
        while let Some(node) = stack.pop() {
            component.push(node);
            for &next in &adjacency[node] {
                if !visited[next] {
                    visited[next] = true;
                    stack.push(next);
                }
            }
        }
        if component.len() > 1 {
            component.sort_unstable();
            components.push(component);
        }
    }
    components
}

/// Member with the earliest parseable upload date; unparseable dates sort
/// last and ties go to the lowest index.
///
/// `members` must be non-empty and ascending.
pub fn select_original(members: &[usize], dates: &[Option<NaiveDate>]) -> usize {
    members
        .iter()
        .copied()
        .min_by_key(|&m| (dates[m].is_none(), dates[m], m))
        .unwrap_or(0)
}

/// Most frequent label, ties going to the earliest member in `labels`.
pub fn dominant_label<'a>(labels: impl IntoIterator<Item = &'a str>) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for label in labels {
        match counts.iter_mut().find(|(l, _)| *l == label) {
            Some((_, count)) => *count += 1,
            None => counts.push((label, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (label, count) in counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best.map(|(l, _)| l.to_string()).unwrap_or_default()
}

/// Thresholds `matrix` and turns each component into a cluster.
///
/// `items` must hold every identifier in the matrix index; identifiers
/// without an item are skipped.
pub fn build_clusters(
    matrix: &SimilarityMatrix,
    threshold: f64,
    items: &HashMap<ItemId, &Item>,
    code: &str,
) -> Vec<ReuploadCluster> {
    let resolved: Vec<Option<&Item>> = matrix.ids().iter().map(|id| items.get(id).copied()).collect();
    let dates: Vec<Option<NaiveDate>> = resolved
        .iter()
        .map(|item| item.and_then(|i| i.upload_date()))
        .collect();

    let mut clusters = Vec::new();
    for component in connected_components(matrix, threshold) {
        let members: Vec<usize> = component
            .into_iter()
            .filter(|&m| resolved[m].is_some())
            .collect();
        if members.len() < 2 {
            continue;
        }

        let original_idx = select_original(&members, &dates);
        let Some(original) = resolved[original_idx] else {
            continue;
        };

        let reuploads: Vec<Reupload> = members
            .iter()
            .copied()
            .filter(|&m| m != original_idx)
            .filter_map(|m| {
                resolved[m].map(|item| Reupload {
                    item: ClusterMember::from(item),
                    similarity: matrix.get(original_idx, m),
                })
            })
            .collect();

        let dominant_type = dominant_label(
            std::iter::once(original.type_label.as_str())
                .chain(reuploads.iter().map(|r| r.item.type_label.as_str())),
        );

        log::info!(
            "Cluster found in {}: original {} with {} reuploads",
            code,
            original.id,
            reuploads.len()
        );
        clusters.push(ReuploadCluster {
            code: code.to_string(),
            original: ClusterMember::from(original),
            reuploads,
            dominant_type,
            threshold,
        });
    }
    clusters
}

/// Largest clusters first; ties by code, then original identifier.
pub fn sort_clusters(clusters: &mut [ReuploadCluster]) {
    clusters.sort_by(|a, b| {
        b.size()
            .cmp(&a.size())
            .then_with(|| a.code.cmp(&b.code))
            .then_with(|| a.original.id.cmp(&b.original.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::item::ItemRecord;
    use crate::core::matrix::ItemIndex;

    fn item(id: &str, date: &str, label: &str) -> Item {
        Item::from_record(ItemRecord {
            id: id.to_string(),
            source: format!("https://example.com/{id}"),
            declared_type: label.to_string(),
            code: "C1".to_string(),
            upload_date: date.to_string(),
            audio: Some(format!("{id}.wav")),
            video: None,
        })
    }

    fn matrix(ids: &[&str], edges: &[(usize, usize, f64)]) -> SimilarityMatrix {
        let mut m =
            SimilarityMatrix::identity(ItemIndex::new(ids.iter().map(|id| ItemId::from(*id))));
        for &(i, j, v) in edges {
            m.set_symmetric(i, j, v);
        }
        m
    }

    #[test]
    fn test_components_are_transitive() {
        let m = matrix(
            &["a", "b", "c", "d", "e"],
            &[(0, 1, 0.9), (1, 2, 0.8), (3, 4, 0.5)],
        );
        assert_eq!(connected_components(&m, 0.75), vec![vec![0, 1, 2]]);
        assert_eq!(
            connected_components(&m, 0.5),
            vec![vec![0, 1, 2], vec![3, 4]]
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let m = matrix(&["a", "b"], &[(0, 1, 0.75)]);
        assert_eq!(connected_components(&m, 0.75).len(), 1);
    }

    #[test]
    fn test_original_selection() {
        let dates = vec![
            NaiveDate::from_ymd_opt(2023, 5, 1),
            None,
            NaiveDate::from_ymd_opt(2021, 1, 1),
            NaiveDate::from_ymd_opt(2021, 1, 1),
        ];
        assert_eq!(select_original(&[0, 1, 2, 3], &dates), 2);
        assert_eq!(select_original(&[0, 1], &dates), 0);
        assert_eq!(select_original(&[1], &dates), 1);

        let none = vec![None, None, None];
        assert_eq!(select_original(&[0, 1, 2], &none), 0);
    }

    #[test]
    fn test_clusters_report_similarity_to_original() {
        let items = [
            item("a", "20230101", "Video"),
            item("b", "20200101", "Video"),
            item("c", "garbage", "MV"),
        ];
        let lookup: HashMap<ItemId, &Item> = items.iter().map(|i| (i.id.clone(), i)).collect();
        // a-b strong, a-c strong, b-c weak: c joins through a
        let m = matrix(&["a", "b", "c"], &[(0, 1, 0.9), (0, 2, 0.8), (1, 2, 0.1)]);

        let clusters = build_clusters(&m, 0.75, &lookup, "C1");
        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.original.id, ItemId::from("b"));
        assert_eq!(cluster.size(), 3);

        let scores: HashMap<&str, f64> = cluster
            .reuploads
            .iter()
            .map(|r| (r.item.id.as_str(), r.similarity))
            .collect();
        assert_eq!(scores["a"], 0.9);
        assert_eq!(scores["c"], 0.1);
        assert_eq!(cluster.dominant_type, "Video");
        assert!((cluster.mean_similarity() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_singletons_never_materialize() {
        let items = [item("a", "20230101", "Video"), item("b", "20200101", "Video")];
        let lookup: HashMap<ItemId, &Item> = items.iter().map(|i| (i.id.clone(), i)).collect();
        let m = matrix(&["a", "b"], &[(0, 1, 0.2)]);
        assert!(build_clusters(&m, 0.75, &lookup, "C1").is_empty());
    }

    #[test]
    fn test_dominant_label_ties_go_to_first() {
        assert_eq!(dominant_label(["Karaoke", "Video"]), "Karaoke");
        assert_eq!(dominant_label(["Karaoke", "Video", "Video"]), "Video");
        assert_eq!(dominant_label(Vec::<&str>::new()), "");
    }

    #[test]
    fn test_sort_clusters() {
        let base = |code: &str, original: &str, reuploads: usize| ReuploadCluster {
            code: code.to_string(),
            original: ClusterMember::from(&item(original, "20200101", "Video")),
            reuploads: (0..reuploads)
                .map(|n| Reupload {
                    item: ClusterMember::from(&item(&format!("{original}{n}"), "", "Video")),
                    similarity: 0.9,
                })
                .collect(),
            dominant_type: "Video".to_string(),
            threshold: 0.75,
        };
        let mut clusters = vec![base("B", "x", 1), base("A", "y", 1), base("C", "z", 3)];
        sort_clusters(&mut clusters);
        let order: Vec<&str> = clusters.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(order, vec!["C", "A", "B"]);
    }
}

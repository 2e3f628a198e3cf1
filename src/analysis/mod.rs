//! Numeric half of the pipeline: embeddings, k-means clustering with
//! representative selection, and the t-SNE projection used for display.

#[cfg(feature = "local-ml")]
pub mod bert;
pub mod convert;
pub mod hashing;
pub mod kmeans;
pub mod linalg;
pub mod traits;
pub mod tsne;

use ndarray::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::analysis::kmeans::{KMeans, argmin};
use crate::analysis::linalg::squared_distance;
use crate::analysis::traits::Clusterer;
use crate::config::ClusteringConfig;
use crate::{AppError, AppResult};

/// Labels and representatives for one clustering of the embedding matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterResult {
    /// Cluster count asked for by the caller.
    pub requested_k: usize,
    /// `min(requested_k, n_samples)`; the count actually used.
    pub effective_k: usize,
    /// Cluster id per sample, index-aligned with the embeddings.
    pub labels: Vec<usize>,
    /// At most one sample index per non-empty cluster, in ascending cluster order.
    pub representatives: Vec<usize>,
}

/// Never request more clusters than there are points.
pub fn clamp_k(k: usize, n_samples: usize) -> usize {
    k.min(n_samples)
}

/// For every non-empty cluster in `0..n_clusters`, the index of the member closest
/// (squared Euclidean) to the cluster mean. Ties go to the lowest index.
pub fn cluster_center_idxs(
    embeddings: &Array2<f64>, // embeddings = (n_samples, n_features)
    labels: &[usize],         // labels = (n_samples,)
    n_clusters: usize,
) -> Vec<usize> {
    let mut closest_embedding_idxs = Vec::with_capacity(n_clusters);
    for cluster in 0..n_clusters {
        let cluster_indices: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == cluster)
            .map(|(i, _)| i)
            .collect();
        if cluster_indices.is_empty() {
            continue;
        }
        let cluster_embeddings = embeddings.select(Axis(0), &cluster_indices);
        let Some(cluster_center) = cluster_embeddings.mean_axis(Axis(0)) else {
            continue;
        };

        let distances: Vec<f64> = cluster_embeddings
            .axis_iter(Axis(0))
            .map(|row| squared_distance(row, cluster_center.view()))
            .collect();
        if let Some(closest_in_cluster) = argmin(distances.iter()) {
            closest_embedding_idxs.push(cluster_indices[closest_in_cluster]);
        }
    }
    closest_embedding_idxs
}

/// Seeded k-means++ / Lloyd clusterer.
#[derive(Debug, Clone)]
pub struct KMeansClusterer {
    seed: u64,
    max_iterations: usize,
    tolerance: f64,
}

impl Default for KMeansClusterer {
    fn default() -> Self {
        Self::from_config(&ClusteringConfig::default())
    }
}

impl KMeansClusterer {
    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self {
            seed: config.seed,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }
}

impl Clusterer for KMeansClusterer {
    #[tracing::instrument(name = "Clustering embeddings", level = "debug", skip(self, embeddings))]
    fn cluster(&self, embeddings: &Array2<f64>, k: usize) -> AppResult<ClusterResult> {
        let n_samples = embeddings.nrows();
        if n_samples == 0 {
            return Err(AppError::Other("cannot cluster zero embeddings".to_string()));
        }
        let effective_k = clamp_k(k, n_samples);
        if effective_k == 0 {
            return Err(AppError::Other("cluster count must be positive".to_string()));
        }

        let mut km = KMeans::new(effective_k);
        km.set_seed(self.seed)
            .set_max_iterations(self.max_iterations)
            .set_tolerance(self.tolerance);
        let fit = km.fit(embeddings)?;

        let representatives = cluster_center_idxs(embeddings, &fit.labels, effective_k);
        debug!(
            "k={} (effective {}): {} representatives {:?}",
            k,
            effective_k,
            representatives.len(),
            representatives
        );

        Ok(ClusterResult {
            requested_k: k,
            effective_k,
            labels: fit.labels,
            representatives,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn six_points() -> Array2<f64> {
        array![
            [0.0, 0.0, 1.0],
            [0.1, 0.0, 1.0],
            [0.0, 0.2, 1.0],
            [5.0, 5.0, 0.0],
            [5.1, 5.0, 0.0],
            [5.0, 4.8, 0.0],
        ]
    }

    #[test]
    fn center_idxs_pick_member_nearest_mean() {
        let x = array![[0.0], [1.0], [5.0], [10.0], [11.0]];
        let labels = [0, 0, 0, 1, 1];
        // cluster 0 mean = 2.0 -> index 1; cluster 1 mean = 10.5 -> tie, lowest index 3
        assert_eq!(cluster_center_idxs(&x, &labels, 2), vec![1, 3]);
    }

    #[test]
    fn center_idxs_skip_empty_clusters() {
        let x = array![[0.0], [1.0], [2.0]];
        let labels = [0, 0, 2];
        assert_eq!(cluster_center_idxs(&x, &labels, 4), vec![0, 2]);
    }

    #[test]
    fn clamp_law() {
        assert_eq!(clamp_k(4, 3), 3);
        assert_eq!(clamp_k(2, 6), 2);
    }

    #[test]
    fn clustering_is_deterministic() {
        let x = six_points();
        let clusterer = KMeansClusterer::default();
        for k in [2, 4] {
            let a = clusterer.cluster(&x, k).unwrap();
            let b = clusterer.cluster(&x, k).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn representatives_are_in_range_and_match_their_cluster() {
        let x = six_points();
        let result = KMeansClusterer::default().cluster(&x, 4).unwrap();
        assert_eq!(result.labels.len(), 6);
        let mut seen_labels = Vec::new();
        for &rep in &result.representatives {
            assert!(rep < 6);
            seen_labels.push(result.labels[rep]);
        }
        // one representative per non-empty cluster, no duplicates
        let mut non_empty: Vec<usize> = result.labels.clone();
        non_empty.sort_unstable();
        non_empty.dedup();
        assert_eq!(seen_labels, non_empty);
    }

    #[test]
    fn requested_k_above_n_is_clamped() {
        let x = array![[0.0, 0.0], [1.0, 1.0], [2.0, 0.0]];
        let result = KMeansClusterer::default().cluster(&x, 4).unwrap();
        assert_eq!(result.requested_k, 4);
        assert_eq!(result.effective_k, 3);
        assert!(result.labels.iter().all(|&l| l < 3));
        assert!(result.representatives.len() <= 3);
    }

    #[test]
    fn two_blobs_get_two_representatives() {
        let result = KMeansClusterer::default().cluster(&six_points(), 2).unwrap();
        assert_eq!(result.representatives.len(), 2);
        assert_ne!(result.labels[0], result.labels[3]);
    }
}

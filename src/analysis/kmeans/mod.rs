mod lloyd;
mod utils;

use std::collections::HashSet;

use ndarray::prelude::*;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::analysis::linalg::{mean_feature_variance, row_norms};
use crate::{AppError, AppResult};

pub use utils::{argmin, euclidean_distances};

static DEFAULT_K: usize = 8;
static DEFAULT_MAX_ITER: usize = 300;
static DEFAULT_TOLERANCE: f64 = 1e-4;

/// Greedy k-means++ seeding.
fn kmeans_plus_plus(
    x: &Array2<f64>, // x = (n_samples, n_features)
    n_clusters: usize,
    x_squared_norms: &Array1<f64>, // x_squared_norms = (n_samples,)
    rng: &mut StdRng,
    n_local_trials: Option<usize>,
) -> Array2<f64> {
    let n_samples = x.nrows();
    let n_features = x.ncols();
    let n_local_trials = n_local_trials.unwrap_or(2 + (n_clusters as f64).ln() as usize);
    let mut centers: Array2<f64> = Array2::<f64>::zeros((n_clusters, n_features));

    let center_id = rng.random_range(0..n_samples);
    centers.row_mut(0).assign(&x.row(center_id));

    // closest_dist_sq = (n_samples,)
    let mut closest_dist_sq: Array1<f64> = euclidean_distances(
        x.slice(s![center_id..center_id + 1, ..]),
        x.view(),
        Some(x_squared_norms),
        true,
    )
    .row(0)
    .to_owned();
    let mut current_pot: f64 = closest_dist_sq.sum();

    for c in 1..n_clusters {
        let rand_vals: Vec<f64> = (0..n_local_trials)
            .map(|_| rng.random::<f64>() * current_pot)
            .collect();
        let candidate_ids = utils::searchsorted_cumsum(&closest_dist_sq, &rand_vals);

        // distance_to_candidates = (n_local_trials, n_samples)
        let mut distance_to_candidates: Array2<f64> = euclidean_distances(
            x.select(Axis(0), &candidate_ids).view(),
            x.view(),
            Some(x_squared_norms),
            true,
        );
        for mut row in distance_to_candidates.axis_iter_mut(Axis(0)) {
            row.zip_mut_with(&closest_dist_sq, |d, &closest| {
                if closest < *d {
                    *d = closest;
                }
            });
        }
        let candidates_pot: Array1<f64> = distance_to_candidates.sum_axis(Axis(1));
        let best = argmin(candidates_pot.iter()).unwrap_or(0);

        current_pot = candidates_pot[best];
        closest_dist_sq = distance_to_candidates.row(best).to_owned();
        let best_candidate = candidate_ids[best];
        centers.row_mut(c).assign(&x.row(best_candidate));
    }
    centers
}

/// Result of fitting [`KMeans`].
#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// Cluster id per sample, in `0..k`.
    pub labels: Vec<usize>,
    /// Cluster centers in the original (uncentered) coordinates.
    pub centers: Array2<f64>,
    pub inertia: f64,
    pub n_iter: usize,
    /// Number of cluster ids that received at least one sample.
    pub distinct_clusters: usize,
}

/// Seeded k-means with a single k-means++ initialization. Two fits with the
/// same settings and data give identical results.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub k: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for KMeans {
    fn default() -> Self {
        KMeans {
            k: DEFAULT_K,
            max_iterations: DEFAULT_MAX_ITER,
            tolerance: DEFAULT_TOLERANCE,
            seed: 0,
        }
    }
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        KMeans {
            k,
            ..Default::default()
        }
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> &mut Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn set_tolerance(&mut self, tolerance: f64) -> &mut Self {
        self.tolerance = tolerance;
        self
    }

    pub fn set_seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    /// Fit on `x` = (n_samples, n_features). `k` must be in `1..=n_samples`.
    pub fn fit(&self, x: &Array2<f64>) -> AppResult<KMeansFit> {
        let n_samples = x.nrows();
        if self.k == 0 || self.k > n_samples {
            return Err(AppError::Other(format!(
                "k-means needs 1 <= k <= n_samples, got k={} for {} samples",
                self.k, n_samples
            )));
        }

        let mut x = x.clone(); // x = (n_samples, n_features)
        let x_mean: Array1<f64> = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::<f64>::zeros(x.ncols())); // x_mean = (n_features,)
        x -= &x_mean;
        let x_squared_norms = row_norms(&x, true); // x_squared_norms = (n_samples,)
        let tol = self.tolerance * mean_feature_variance(&x);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let centers_init = kmeans_plus_plus(&x, self.k, &x_squared_norms, &mut rng, None); // (k, n_features)
        let mut fit = lloyd::kmeans_single_lloyd(&x, &centers_init, self.max_iterations, tol);
        fit.centers += &x_mean;

        let distinct_clusters = fit.labels.iter().copied().collect::<HashSet<usize>>().len();
        if distinct_clusters < self.k {
            warn!(
                "Number of distinct clusters ({}) found smaller than n_clusters ({}). Possibly due to duplicate points in X.",
                distinct_clusters, self.k
            );
        }
        debug!(
            "k-means with k={} converged after {} iterations, inertia={}",
            self.k, fit.n_iter, fit.inertia
        );

        Ok(KMeansFit {
            labels: fit.labels,
            centers: fit.centers,
            inertia: fit.inertia,
            n_iter: fit.n_iter,
            distinct_clusters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.2, 0.1],
            [0.1, 0.3],
            [9.0, 9.0],
            [9.2, 9.1],
            [9.1, 8.8],
        ]
    }

    #[test]
    fn separates_two_blobs() {
        let fit = KMeans::new(2).fit(&blobs()).unwrap();
        assert_eq!(fit.labels[0], fit.labels[1]);
        assert_eq!(fit.labels[1], fit.labels[2]);
        assert_eq!(fit.labels[3], fit.labels[4]);
        assert_eq!(fit.labels[4], fit.labels[5]);
        assert_ne!(fit.labels[0], fit.labels[3]);
        assert_eq!(fit.distinct_clusters, 2);
    }

    #[test]
    fn same_seed_same_result() {
        let x = blobs();
        let mut km = KMeans::new(3);
        km.set_seed(7);
        let a = km.fit(&x).unwrap();
        let b = km.fit(&x).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.centers, b.centers);
    }

    #[test]
    fn centers_are_reported_in_input_coordinates() {
        let fit = KMeans::new(2).fit(&blobs()).unwrap();
        let far = fit.labels[3];
        assert!((fit.centers[(far, 0)] - 9.1).abs() < 1e-9);
    }

    #[test]
    fn rejects_k_larger_than_samples() {
        assert!(KMeans::new(7).fit(&blobs()).is_err());
        assert!(KMeans::new(0).fit(&blobs()).is_err());
    }

    #[test]
    fn duplicate_points_leave_clusters_empty() {
        let x = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let fit = KMeans::new(4).fit(&x).unwrap();
        assert_eq!(fit.labels.len(), 4);
        assert!(fit.distinct_clusters <= 4);
        assert!(fit.labels.iter().all(|&l| l < 4));
    }

    #[test]
    fn plus_plus_seeds_land_in_different_blobs() {
        let x = blobs();
        let norms = row_norms(&x, true);
        let mut rng = StdRng::seed_from_u64(0);
        let centers = kmeans_plus_plus(&x, 2, &norms, &mut rng, None);
        assert_eq!(centers.nrows(), 2);
        assert_ne!(centers[(0, 0)] < 5.0, centers[(1, 0)] < 5.0);
    }
}

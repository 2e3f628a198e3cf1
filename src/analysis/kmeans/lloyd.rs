use ndarray::prelude::*;

use crate::analysis::kmeans::utils::{argmin, euclidean_distances};
use crate::analysis::linalg::row_norms;

/// Outcome of a single Lloyd run.
#[derive(Debug, Clone)]
pub struct LloydFit {
    pub labels: Vec<usize>,
    pub centers: Array2<f64>,
    pub inertia: f64,
    pub n_iter: usize,
}

/// Compute the inertia (sum of squared distances) for the current labels.
fn inertia_dense(
    x: &Array2<f64>,       // x = (n_samples, n_features)
    centers: &Array2<f64>, // centers = (n_clusters, n_features)
    labels: &[usize],      // labels = (n_samples,)
) -> f64 {
    labels
        .iter()
        .enumerate()
        .map(|(i, &label)| {
            let diff = &x.row(i) - &centers.row(label);
            diff.dot(&diff)
        })
        .sum()
}

/// Assign every sample to its nearest center. Ties go to the lower cluster id.
fn assign_labels(x: &Array2<f64>, centers: &Array2<f64>) -> Vec<usize> {
    let x_sq = row_norms(x, true);
    // distances = (n_clusters, n_samples)
    let distances = euclidean_distances(centers.view(), x.view(), Some(&x_sq), true);
    distances
        .axis_iter(Axis(1))
        .map(|col| argmin(col.iter()).unwrap_or(0))
        .collect()
}

/// Recompute centers as member means. Empty clusters keep their previous center.
/// Returns (centers_new, center_shift) where center_shift = (n_clusters,).
fn update_centers(
    x: &Array2<f64>,
    labels: &[usize],
    centers_old: &Array2<f64>,
) -> (Array2<f64>, Array1<f64>) {
    let n_clusters = centers_old.nrows();
    let mut centers_new = Array2::<f64>::zeros(centers_old.raw_dim());
    let mut counts = vec![0usize; n_clusters];

    for (i, &label) in labels.iter().enumerate() {
        counts[label] += 1;
        let mut row = centers_new.row_mut(label);
        row += &x.row(i);
    }

    for (cluster, &count) in counts.iter().enumerate() {
        if count > 0 {
            let mut row = centers_new.row_mut(cluster);
            row /= count as f64;
        } else {
            centers_new
                .row_mut(cluster)
                .assign(&centers_old.row(cluster));
        }
    }

    let diff = centers_old - &centers_new; // (n_clusters, n_features)
    let center_shift = row_norms(&diff, false); // (n_clusters,)
    (centers_new, center_shift)
}

/// Run a single K-Means using Lloyd's algorithm from the given initial centers.
///
/// Stops when the labels stop changing (strict convergence) or when the total
/// squared center shift drops to `tol` or below.
pub fn kmeans_single_lloyd(
    x: &Array2<f64>,            // x = (n_samples, n_features)
    centers_init: &Array2<f64>, // centers_init = (n_clusters, n_features)
    max_iter: usize,
    tol: f64,
) -> LloydFit {
    let mut centers = centers_init.clone();
    let mut labels: Vec<usize> = Vec::new();
    let mut strict_convergence = false;
    let mut iterations = 0;

    for i in 0..max_iter {
        let new_labels = assign_labels(x, &centers);
        iterations = i + 1;

        if new_labels == labels {
            strict_convergence = true;
            break;
        }

        let (centers_new, center_shift) = update_centers(x, &new_labels, &centers);
        let center_shift_tot: f64 = center_shift.iter().map(|v| v * v).sum();

        centers = centers_new;
        labels = new_labels;

        if center_shift_tot <= tol {
            break;
        }
    }

    if !strict_convergence {
        // Ensure labels reflect final centers
        labels = assign_labels(x, &centers);
    }

    let inertia = inertia_dense(x, &centers, &labels);

    LloydFit {
        labels,
        centers,
        inertia,
        n_iter: iterations,
    }
}

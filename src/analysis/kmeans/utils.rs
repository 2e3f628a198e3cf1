use std::cmp::Ordering;

use ndarray::prelude::*;

use crate::analysis::linalg::row_norms;

/// Pairwise Euclidean distances between the rows of `a` and `b`.
/// Returns (n_a, n_b). Precomputed squared row norms can be passed to skip recomputation.
pub fn euclidean_distances(
    a: ArrayView2<f64>,                   // a = (n_a, n_features)
    b: ArrayView2<f64>,                   // b = (n_b, n_features)
    b_norm_squared: Option<&Array1<f64>>, // b_norm_squared = (n_b,)
    squared: bool,
) -> Array2<f64> {
    let aa: Array1<f64> = row_norms(&a, true);
    let bb: Array1<f64> = match b_norm_squared {
        Some(norms) => norms.clone(),
        None => row_norms(&b, true),
    };
    let mut distances: Array2<f64> = a.dot(&b.t());
    distances.mapv_inplace(|v| -2.0 * v);
    distances += &aa.insert_axis(Axis(1));
    distances += &bb.insert_axis(Axis(0));
    distances.mapv_inplace(|d| if d > 0.0 { d } else { 0.0 });
    if !squared {
        distances.mapv_inplace(|d| d.sqrt());
    }
    distances
}

/// Index of the smallest value; ties resolve to the lowest index. `None` when empty.
pub fn argmin<'a, I>(values: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a f64>,
{
    values
        .into_iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
        .map(|(idx, _)| idx)
}

/// Equivalent to: np.searchsorted(np.cumsum(weights), rand_vals), clipped to the last index.
pub fn searchsorted_cumsum(weights: &Array1<f64>, rand_vals: &[f64]) -> Vec<usize> {
    let mut cumsum = Vec::with_capacity(weights.len());
    let mut acc = 0.0;
    for &w in weights {
        acc += w;
        cumsum.push(acc);
    }
    let last = cumsum.len().saturating_sub(1);

    rand_vals
        .iter()
        .map(|rv| {
            // left-side insertion point: first index with cumsum[idx] >= rv
            cumsum.partition_point(|&c| c < *rv).min(last)
        })
        .collect()
}

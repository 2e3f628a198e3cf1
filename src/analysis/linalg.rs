use ndarray::prelude::*;
use ndarray::{Data, OwnedRepr, RemoveAxis};

pub fn row_norms<S, D>(x: &ArrayBase<S, D>, squared: bool) -> ArrayBase<OwnedRepr<f64>, D::Smaller>
where
    S: Data<Elem = f64>,
    D: Dimension + RemoveAxis,
{
    let prod: ArrayBase<OwnedRepr<f64>, D> = x.mapv(|v| v * v);
    let sum: ArrayBase<OwnedRepr<f64>, D::Smaller> = prod.sum_axis(Axis(1));
    if !squared { sum.sqrt() } else { sum }
}

/// Sum of squared coordinate differences between two vectors.
pub fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Mean of the per-feature variances; used to scale convergence tolerances.
pub fn mean_feature_variance(x: &Array2<f64>) -> f64 {
    if x.nrows() == 0 {
        return 0.0;
    }
    x.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0)
}

//! Exact t-SNE for small embedding sets.
//!
//! Follows the usual recipe: per-point Gaussian bandwidths found by binary search
//! to hit the target perplexity, symmetrized joint probabilities, and Student-t
//! similarities in the 2D map optimized by gradient descent with momentum,
//! adaptive gains and an early exaggeration phase. Inputs are at most a few
//! hundred snippets, so the O(n²) exact gradient is used throughout.

use ndarray::prelude::*;
use ndarray_rand::RandomExt;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand_distr::Normal;
use tracing::{Span, debug, info_span, trace};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::style::ProgressStyle;

use crate::analysis::kmeans::euclidean_distances;
use crate::analysis::traits::Projector;
use crate::config::ProjectionConfig;
use crate::{AppError, AppResult};

static MACHINE_EPSILON: f64 = f64::EPSILON;
static EPSILON_DBL: f64 = 1e-8;
static PERPLEXITY_TOLERANCE: f64 = 1e-5;
static PERPLEXITY_STEPS: usize = 100;
static EARLY_EXAGGERATION: f64 = 12.0;
static EXPLORATION_ITERATIONS: usize = 250;
static INITIAL_MOMENTUM: f64 = 0.5;
static FINAL_MOMENTUM: f64 = 0.8;
static MIN_GAIN: f64 = 0.01;
static INIT_STD: f64 = 1e-4;

/// Perplexity must stay below the number of samples.
pub fn effective_perplexity(perplexity: f64, n_samples: usize) -> f64 {
    perplexity.min(n_samples.saturating_sub(1) as f64)
}

/// `max(n / early_exaggeration / 4, 50)`.
pub fn auto_learning_rate(n_samples: usize) -> f64 {
    (n_samples as f64 / EARLY_EXAGGERATION / 4.0).max(50.0)
}

/// Conditional probabilities P(j|i) with per-row precision chosen so each row's
/// entropy equals ln(perplexity).
fn binary_search_perplexity(sq_distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n_samples = sq_distances.nrows();
    let desired_entropy = perplexity.ln();
    let mut p = Array2::<f64>::zeros((n_samples, n_samples));

    for i in 0..n_samples {
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;
        let mut beta = 1.0;

        for _ in 0..PERPLEXITY_STEPS {
            let mut sum_p = 0.0;
            for j in 0..n_samples {
                let v = if j == i {
                    0.0
                } else {
                    (-sq_distances[(i, j)] * beta).exp()
                };
                p[(i, j)] = v;
                sum_p += v;
            }
            if sum_p == 0.0 {
                sum_p = EPSILON_DBL;
            }
            let mut sum_disti_pi = 0.0;
            for j in 0..n_samples {
                p[(i, j)] /= sum_p;
                sum_disti_pi += sq_distances[(i, j)] * p[(i, j)];
            }

            let entropy = sum_p.ln() + beta * sum_disti_pi;
            let diff = entropy - desired_entropy;
            if diff.abs() <= PERPLEXITY_TOLERANCE {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max == f64::INFINITY {
                    beta * 2.0
                } else {
                    (beta + beta_max) / 2.0
                };
            } else {
                beta_max = beta;
                beta = if beta_min == f64::NEG_INFINITY {
                    beta / 2.0
                } else {
                    (beta + beta_min) / 2.0
                };
            }
        }
        trace!("Point {} precision {}", i, beta);
    }
    p
}

/// Symmetric joint probabilities over all pairs, summing to one.
pub fn joint_probabilities(sq_distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let conditional = binary_search_perplexity(sq_distances, perplexity);
    let mut p = &conditional + &conditional.t();
    let sum_p = p.sum().max(MACHINE_EPSILON);
    p.mapv_inplace(|v| (v / sum_p).max(MACHINE_EPSILON));
    for i in 0..p.nrows() {
        p[(i, i)] = 0.0;
    }
    p
}

/// KL divergence of the map and its gradient for the current layout.
fn kl_divergence_grad(p: &Array2<f64>, y: &Array2<f64>, exaggeration: f64) -> (f64, Array2<f64>) {
    let n_samples = y.nrows();
    let sq = euclidean_distances(y.view(), y.view(), None, true);
    let mut num = sq.mapv(|d| 1.0 / (1.0 + d));
    for i in 0..n_samples {
        num[(i, i)] = 0.0;
    }
    let sum_num = num.sum().max(MACHINE_EPSILON);

    let mut kl = 0.0;
    let mut grad = Array2::<f64>::zeros((n_samples, 2));
    for i in 0..n_samples {
        for j in 0..n_samples {
            if i == j {
                continue;
            }
            let q = (num[(i, j)] / sum_num).max(MACHINE_EPSILON);
            let pij = p[(i, j)] * exaggeration;
            kl += pij * (pij.max(MACHINE_EPSILON) / q).ln();
            let coeff = 4.0 * (pij - q) * num[(i, j)];
            grad[(i, 0)] += coeff * (y[(i, 0)] - y[(j, 0)]);
            grad[(i, 1)] += coeff * (y[(i, 1)] - y[(j, 1)]);
        }
    }
    (kl, grad)
}

/// t-SNE projector to two dimensions.
#[derive(Debug, Clone)]
pub struct TsneProjector {
    perplexity: f64,
    iterations: usize,
    seed: u64,
}

impl Default for TsneProjector {
    fn default() -> Self {
        Self::from_config(&ProjectionConfig::default())
    }
}

impl TsneProjector {
    pub fn from_config(config: &ProjectionConfig) -> Self {
        Self {
            perplexity: config.perplexity,
            iterations: config.iterations,
            seed: config.seed,
        }
    }

    fn initial_layout(&self, n_samples: usize) -> AppResult<Array2<f64>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let normal = Normal::new(0.0, INIT_STD)
            .map_err(|e| AppError::Other(format!("invalid t-SNE initialization: {e}")))?;
        Ok(Array2::random_using((n_samples, 2), normal, &mut rng))
    }
}

impl Projector for TsneProjector {
    #[tracing::instrument(name = "Projecting embeddings with t-SNE", level = "debug", skip_all)]
    fn project(&self, embeddings: &Array2<f64>) -> AppResult<Array2<f64>> {
        let n_samples = embeddings.nrows();
        if n_samples < 2 {
            return Err(AppError::Other(format!(
                "t-SNE needs at least 2 samples, got {n_samples}"
            )));
        }
        let perplexity = effective_perplexity(self.perplexity, n_samples);
        let learning_rate = auto_learning_rate(n_samples);
        debug!(
            "t-SNE on {} samples, perplexity {}, learning rate {}",
            n_samples, perplexity, learning_rate
        );

        let sq_distances = euclidean_distances(embeddings.view(), embeddings.view(), None, true);
        let p = joint_probabilities(&sq_distances, perplexity);

        let mut y = self.initial_layout(n_samples)?;
        let mut update = Array2::<f64>::zeros((n_samples, 2));
        let mut gains = Array2::<f64>::ones((n_samples, 2));

        let header_span = info_span!("Optimizing t-SNE layout");
        header_span.pb_set_message("Projecting...");
        header_span.pb_set_finish_message("Projection complete");
        header_span.pb_set_length(self.iterations as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            header_span.pb_set_style(&style);
        }
        let _enter = header_span.enter();

        let mut kl = 0.0;
        for it in 0..self.iterations {
            let (momentum, exaggeration) = if it < EXPLORATION_ITERATIONS {
                (INITIAL_MOMENTUM, EARLY_EXAGGERATION)
            } else {
                (FINAL_MOMENTUM, 1.0)
            };
            let (error, mut grad) = kl_divergence_grad(&p, &y, exaggeration);
            kl = error;

            azip!((g in &mut grad, u in &update, gain in &mut gains) {
                if *u * *g < 0.0 {
                    *gain += 0.2;
                } else {
                    *gain *= 0.8;
                }
                *gain = gain.max(MIN_GAIN);
                *g *= *gain;
            });
            update = &update * momentum - &grad * learning_rate;
            y += &update;

            if (it + 1) % 50 == 0 {
                trace!("t-SNE iteration {}: KL divergence {}", it + 1, kl);
                Span::current().pb_inc(50);
            }
        }
        debug!("t-SNE finished with KL divergence {}", kl);

        if y.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Other(
                "t-SNE produced non-finite coordinates".to_string(),
            ));
        }
        Ok(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..5 {
            let t = i as f64 * 0.05;
            rows.extend_from_slice(&[t, 0.0, 0.0, 1.0]);
        }
        for i in 0..5 {
            let t = i as f64 * 0.05;
            rows.extend_from_slice(&[5.0 + t, 5.0, 5.0, 0.0]);
        }
        Array2::from_shape_vec((10, 4), rows).unwrap()
    }

    #[test]
    fn perplexity_is_clamped_below_sample_count() {
        assert_eq!(effective_perplexity(30.0, 6), 5.0);
        assert_eq!(effective_perplexity(30.0, 100), 30.0);
        assert_eq!(effective_perplexity(30.0, 1), 0.0);
    }

    #[test]
    fn learning_rate_has_floor() {
        assert_eq!(auto_learning_rate(6), 50.0);
        assert_eq!(auto_learning_rate(4800), 100.0);
    }

    #[test]
    fn joint_probabilities_are_symmetric_and_normalized() {
        let x = blobs();
        let d = euclidean_distances(x.view(), x.view(), None, true);
        let p = joint_probabilities(&d, 4.0);
        assert!((p.sum() - 1.0).abs() < 1e-6, "sum={}", p.sum());
        for i in 0..p.nrows() {
            assert_eq!(p[(i, i)], 0.0);
            for j in 0..p.ncols() {
                assert!((p[(i, j)] - p[(j, i)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn conditional_rows_hit_target_perplexity() {
        let x = blobs();
        let d = euclidean_distances(x.view(), x.view(), None, true);
        let p = binary_search_perplexity(&d, 3.0);
        for row in p.axis_iter(Axis(0)) {
            let entropy: f64 = row
                .iter()
                .filter(|v| **v > 0.0)
                .map(|v| -v * v.ln())
                .sum();
            assert!((entropy - 3.0_f64.ln()).abs() < 1e-3, "entropy={entropy}");
        }
    }

    #[test]
    fn projection_keeps_blobs_apart() {
        let x = blobs();
        let mut config = ProjectionConfig::default();
        config.perplexity = 3.0;
        config.iterations = 500;
        let y = TsneProjector::from_config(&config).project(&x).unwrap();
        assert_eq!(y.dim(), (10, 2));

        let d = euclidean_distances(y.view(), y.view(), None, false);
        let mut within = 0.0;
        let mut across = 0.0;
        for i in 0..10 {
            for j in 0..10 {
                if i == j {
                    continue;
                }
                if (i < 5) == (j < 5) {
                    within += d[(i, j)] / 40.0;
                } else {
                    across += d[(i, j)] / 50.0;
                }
            }
        }
        assert!(across > within, "across={across} within={within}");
    }

    #[test]
    fn projection_is_deterministic() {
        let x = blobs();
        let projector = TsneProjector::default();
        assert_eq!(projector.project(&x).unwrap(), projector.project(&x).unwrap());
    }

    #[test]
    fn handles_the_minimum_of_four_points() {
        let x = array![[0.0, 1.0], [0.1, 1.0], [1.0, 0.0], [1.0, 0.1]];
        let y = TsneProjector::default().project(&x).unwrap();
        assert_eq!(y.dim(), (4, 2));
        assert!(y.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rejects_single_sample() {
        let x = array![[1.0, 2.0]];
        assert!(TsneProjector::default().project(&x).is_err());
    }
}

use ndarray::Array2;

use crate::AppResult;
use crate::analysis::ClusterResult;

/// Trait for converting text into vector embeddings.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts.
    /// Returns one row per text, in input order; every row has the same dimension.
    fn embed(&self, texts: &[String]) -> AppResult<Array2<f64>>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Trait for partitioning vector embeddings.
pub trait Clusterer: Send + Sync {
    /// Cluster the rows of `embeddings` into at most `k` groups.
    fn cluster(&self, embeddings: &Array2<f64>, k: usize) -> AppResult<ClusterResult>;
}

/// Trait for reducing embeddings to display coordinates.
pub trait Projector: Send + Sync {
    /// Returns an (n_samples, 2) array index-aligned with `embeddings`.
    fn project(&self, embeddings: &Array2<f64>) -> AppResult<Array2<f64>>;
}

impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn embed(&self, texts: &[String]) -> AppResult<Array2<f64>> {
        (**self).embed(texts)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

use ndarray::prelude::*;
use tracing::trace;

use crate::{AppError, AppResult};

/// Stack per-text embeddings into an (n_texts, dimension) matrix.
#[tracing::instrument(name = "Converting embeddings", level = "trace", skip(embs))]
pub fn embeddings_to_ndarray(embs: &[Vec<f32>]) -> AppResult<Array2<f64>> {
    let Some(first) = embs.first() else {
        return Err(AppError::Embedding("no embeddings were produced".to_string()));
    };
    let rows = embs.len();
    let cols = first.len();
    if cols == 0 {
        return Err(AppError::Embedding("embeddings have zero dimension".to_string()));
    }
    let mut arr: Array2<f64> = Array2::<f64>::zeros((rows, cols));
    trace!("Initialized ndarray with shape: {:?}", arr.dim());
    for (i, mut row) in arr.axis_iter_mut(Axis(0)).enumerate() {
        if embs[i].len() != cols {
            return Err(AppError::Embedding(format!(
                "embedding {} has dimension {}, expected {}",
                i,
                embs[i].len(),
                cols
            )));
        }
        for (j, val) in row.iter_mut().enumerate() {
            *val = embs[i][j] as f64;
        }
    }
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn converts_embeddings_to_f64_ndarray() {
        let embs = vec![vec![1.0_f32, 2.5_f32], vec![3.75_f32, -4.0_f32]];

        let arr = embeddings_to_ndarray(&embs).unwrap();

        assert_eq!(arr.dim(), (2, 2));
        let expected = array![[1.0_f64, 2.5_f64], [3.75_f64, -4.0_f64]];
        assert_eq!(arr, expected);
    }

    #[test]
    fn rejects_empty_input() {
        let embs: Vec<Vec<f32>> = Vec::new();
        assert!(matches!(
            embeddings_to_ndarray(&embs),
            Err(AppError::Embedding(_))
        ));
    }

    #[test]
    fn rejects_ragged_rows() {
        let embs = vec![vec![1.0_f32, 2.0], vec![3.0_f32]];
        let err = embeddings_to_ndarray(&embs).unwrap_err();
        assert!(err.to_string().contains("embedding 1"), "{err}");
    }
}

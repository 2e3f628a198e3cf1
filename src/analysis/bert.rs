use lean_embed_viz_local_embedder::BertEmbedder as LocalBertEmbedder;
use ndarray::Array2;

use crate::analysis::convert::embeddings_to_ndarray;
use crate::analysis::traits::Embedder;
use crate::{AppError, AppResult};

/// Wrapper around the local sentence-transformers encoder.
#[derive(Clone, Debug)]
pub struct BertEmbedder {
    inner: LocalBertEmbedder,
}

impl Embedder for BertEmbedder {
    fn embed(&self, texts: &[String]) -> AppResult<Array2<f64>> {
        if texts.is_empty() {
            return Err(AppError::Embedding("no texts to embed".to_string()));
        }
        let embeddings = self.inner.embed_texts_blocking(texts)?;
        embeddings_to_ndarray(&embeddings)
    }

    fn name(&self) -> &str {
        self.inner.model_name()
    }
}

impl BertEmbedder {
    /// Load (downloading on first use) the model. Any failure means the backend is unavailable.
    #[tracing::instrument(name = "Loading sentence embedding model", level = "info")]
    pub async fn new_from_pretrained<S: AsRef<str> + std::fmt::Debug>(
        model_name: S,
    ) -> AppResult<Self> {
        let inner = LocalBertEmbedder::new_from_pretrained(model_name)
            .await
            .map_err(|e| AppError::DependencyUnavailable(format!("embedding model: {e}")))?;
        Ok(Self { inner })
    }
}

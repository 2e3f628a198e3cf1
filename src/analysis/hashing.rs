use std::io::Cursor;

use murmur3::murmur3_32;
use ndarray::prelude::*;
use tracing::trace;

use crate::analysis::convert::embeddings_to_ndarray;
use crate::analysis::traits::Embedder;
use crate::config::HashingConfig;
use crate::{AppError, AppResult};

static WORD_WEIGHT: f32 = 1.0;
static TRIGRAM_WEIGHT: f32 = 0.5;

/// Split lowercased text into alphanumeric words; every other non-space character
/// (`→`, `ℤ`, `+`, `:`) is a token of its own.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() || ch == '_' {
            word.push(ch);
            continue;
        }
        if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
        if !ch.is_whitespace() {
            tokens.push(ch.to_string());
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

/// Character trigrams of the whitespace-collapsed, lowercased text.
fn char_trigrams(text: &str) -> Vec<String> {
    let collapsed: Vec<char> = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .flat_map(char::to_lowercase)
        .collect();
    collapsed
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Deterministic bag-of-features embedder. Needs no model files, so it is always available.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    seed: u32,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::from_config(&HashingConfig::default())
    }
}

impl HashingEmbedder {
    pub fn from_config(config: &HashingConfig) -> Self {
        Self {
            dimension: config.dimension,
            seed: config.seed,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) -> AppResult<()> {
        let hash = murmur3_32(&mut Cursor::new(feature.as_bytes()), self.seed)
            .map_err(|e| AppError::Embedding(format!("hashing feature failed: {e}")))?;
        let bucket = (hash as usize >> 1) % self.dimension;
        let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
        Ok(())
    }

    /// Embed one text into a unit-length vector (the zero vector when it has no features).
    pub fn embed_text(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            self.add_feature(&mut vector, &format!("w:{token}"), WORD_WEIGHT)?;
        }
        for gram in char_trigrams(text) {
            self.add_feature(&mut vector, &format!("c:{gram}"), TRIGRAM_WEIGHT)?;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        trace!("Embedded {} chars into {} dims", text.len(), self.dimension);
        Ok(vector)
    }
}

impl Embedder for HashingEmbedder {
    #[tracing::instrument(name = "Hashing formalizations", level = "debug", skip_all)]
    fn embed(&self, texts: &[String]) -> AppResult<Array2<f64>> {
        if self.dimension == 0 {
            return Err(AppError::Embedding("embedding dimension is zero".to_string()));
        }
        let embeddings = texts
            .iter()
            .map(|t| self.embed_text(t))
            .collect::<AppResult<Vec<_>>>()?;
        embeddings_to_ndarray(&embeddings)
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

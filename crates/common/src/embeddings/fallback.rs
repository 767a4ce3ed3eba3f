//! Deterministic hash embedding
//!
//! Each token spreads five equal contributions over hash-derived slots of a
//! fixed-size vector. The result carries no real semantics; it exists so that
//! chunk storage never depends on a remote model.

use super::Embedder;
use crate::errors::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

/// Dimension of fallback vectors
pub const FALLBACK_DIMENSION: usize = 100;

/// Slots touched per token
const SLOTS_PER_TOKEN: usize = 5;

/// Local hash embedder
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(FALLBACK_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// 128-bit token hash taken from the head of a SHA-256 digest
    fn token_hash(token: &str) -> u128 {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 16];
        head.copy_from_slice(&digest[..16]);
        u128::from_be_bytes(head)
    }

    /// Synchronous embedding used by both the trait impl and the service
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered.unicode_words().collect();
        let mut embedding = vec![0.0f32; self.dimension];

        if words.is_empty() {
            return embedding;
        }

        let weight = 1.0 / words.len() as f32;
        let dim = self.dimension as u128;
        for word in &words {
            let base = Self::token_hash(word) % dim;
            for i in 0..SLOTS_PER_TOKEN.min(self.dimension) {
                let idx = ((base + i as u128) % dim) as usize;
                embedding[idx] += weight;
            }
        }

        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in embedding.iter_mut() {
                *x /= norm;
            }
        }

        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn model_name(&self) -> &str {
        "simple-local"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

//! Embedding provider seam.
//!
//! Embeddings are supplied by an external service; the engine never computes
//! them. Candidates usually arrive with vectors attached, so this seam only
//! serves callers that need an ad-hoc query embedding.

use async_trait::async_trait;

use crate::error::EngineResult;

/// External embedding service returning fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Dimension of the vectors this provider returns.
    fn dimension(&self) -> usize;
}

/// Deterministic hash-based provider for tests and development.
///
/// No model files, no network; the same text always yields the same
/// L2-normalized vector.
pub struct StubEmbeddingProvider {
    dimension: usize,
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StubEmbeddingProvider {
    pub fn new() -> Self {
        Self { dimension: 256 }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let bytes = text.as_bytes();
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        for &b in bytes {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(b as u64);
        }

        let mut embedding = vec![0.0f32; self.dimension];
        for (i, slot) in embedding.iter_mut().enumerate() {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407 ^ i as u64);
            // Map the top bits to [-1, 1].
            *slot = ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut embedding {
                *val /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        Ok(self.generate(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

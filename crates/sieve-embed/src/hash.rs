use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use sieve_core::Embedder;

/// Deterministic bag-of-tokens embedder: each whitespace token is hashed into
/// one of `dim` buckets, then the vector is L2-normalised. Shared tokens mean
/// positive cosine similarity, which is enough for offline runs and tests.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text.split_whitespace().map(str::to_lowercase) {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h % self.dim as u64) as usize;
            #[allow(clippy::cast_precision_loss)]
            let weight = 0.5 + ((h >> 32) as f32) / (u32::MAX as f32) * 0.5;
            v[idx] += weight;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

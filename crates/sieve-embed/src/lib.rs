//! sieve-embed
//!
//! Embedding backends behind `sieve_core::Embedder`: a candle XLM-RoBERTa
//! model for real runs and a hashing embedder for tests and offline use.
use anyhow::Result;

use sieve_core::Embedder;

pub mod bert;
pub mod device;
pub mod hash;
pub mod pool;
pub mod tokenize;

pub use bert::BertEmbedder;
pub use hash::HashEmbedder;
pub use pool::masked_mean_l2;

pub const FAKE_DIM: usize = 1024;

/// The hashing embedder when `SIEVE_USE_FAKE_EMBEDDINGS` is `1`/`true`, the real model otherwise.
pub fn default_embedder() -> Result<Box<dyn Embedder>> {
    let use_fake = std::env::var("SIEVE_USE_FAKE_EMBEDDINGS").ok().is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if use_fake {
        tracing::info!("using hash embedder");
        return Ok(Box::new(HashEmbedder::new(FAKE_DIM)));
    }
    Ok(Box::new(BertEmbedder::load(&bert::resolve_model_dir()?)?))
}

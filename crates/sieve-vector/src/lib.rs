//! sieve-vector
//!
//! Dense leaves built on an `Embedder`: an in-memory retriever, a re-ranker
//! with a content-hash embedding cache, and a LanceDB-backed retriever.
pub mod encoder;
pub mod lance;
pub mod query;
pub mod ranker;
pub mod table;

pub use encoder::EncoderRetriever;
pub use lance::LanceRetriever;
pub use ranker::EncoderRanker;

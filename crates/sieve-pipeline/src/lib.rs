//! sieve-pipeline
//!
//! Composition of retrieval stages into one callable pipeline:
//! - `chain` runs stages in sequence, each one searching only the previous output
//! - `union` merges branches, first occurrence per key wins
//! - `vote` merges branches by mean normalised score
//! - `mapping` resolves bare keys to full documents
//! - `top_k` truncates
//!
//! Building a pipeline executes nothing. `Pipeline::run` evaluates it for a
//! single query or a batch.
mod eval;
pub mod mapping;
mod node;
pub mod union;
pub mod vote;

pub use mapping::DocumentMap;
pub use node::{chain, leaf, mapping, top_k, union, vote, Pipeline};

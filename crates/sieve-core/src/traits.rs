use crate::error::{Error, Result};
use crate::types::{Document, Query, ResultList};

/// The contract every retriever, ranker and pipeline satisfies.
///
/// `search` is read-only. When `candidates` is given, those items are the
/// stage's whole universe: it may reorder, rescore or drop them, but it must
/// not return keys outside of them. A stage with an empty index or no match
/// returns an empty list rather than an error.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn key_field(&self) -> &str;

    /// Configured result cap; `None` means "only reorder, never drop".
    fn k(&self) -> Option<usize>;

    fn search(&self, query: &Query, candidates: Option<&ResultList>, k: Option<usize>) -> Result<ResultList>;

    /// Batched search; position `i` of the output answers `queries[i]`.
    fn search_batch(&self, queries: &[Query], candidates: Option<&[ResultList]>, k: Option<usize>) -> Result<Vec<ResultList>> {
        if let Some(c) = candidates {
            if c.len() != queries.len() {
                return Err(Error::BatchMismatch { stage: self.name().to_string(), expected: queries.len(), actual: c.len() });
            }
        }
        queries
            .iter()
            .enumerate()
            .map(|(i, q)| self.search(q, candidates.map(|c| &c[i]), k))
            .collect()
    }

    /// Index `documents`. Whether re-adding a key overwrites or duplicates is up to the stage.
    fn add(&mut self, documents: &[Document]) -> Result<()>;
}

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

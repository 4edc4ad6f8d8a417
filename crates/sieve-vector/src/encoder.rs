//! Dense retriever over an owned in-memory embedding table.
use std::sync::Arc;

use sieve_core::{Document, Embedder, Error, Key, Query, Result, ResultList, ScoredItem, Stage};

use crate::query::{embed_queries, embed_texts};
use crate::table::{cosine, EmbeddingTable};

pub struct EncoderRetriever {
    name: String,
    key_field: String,
    on: Vec<String>,
    k: Option<usize>,
    embedder: Arc<dyn Embedder>,
    table: EmbeddingTable,
}

impl EncoderRetriever {
    pub fn new(key_field: impl Into<String>, on: Vec<String>, k: Option<usize>, embedder: Arc<dyn Embedder>) -> Self {
        Self { name: format!("encoder({})", on.join(",")), key_field: key_field.into(), on, k, embedder, table: EmbeddingTable::new() }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self { self.name = name.into(); self }

    pub fn len(&self) -> usize { self.table.len() }

    pub fn is_empty(&self) -> bool { self.table.is_empty() }

    fn rank(&self, query_vec: &[f32], candidates: Option<&ResultList>, k: Option<usize>) -> ResultList {
        let mut scored: Vec<(Key, f32)> = match candidates {
            Some(c) => c.keys().filter_map(|key| self.table.get(key).map(|v| (key.clone(), cosine(query_vec, v)))).collect(),
            None => self.table.iter().map(|(key, v)| (key.clone(), cosine(query_vec, v))).collect(),
        };
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let mut out: ResultList = scored.into_iter().map(|(key, s)| ScoredItem::new(&self.key_field, key).with_similarity(s)).collect();
        out.cap(k.or(self.k));
        out
    }
}

impl Stage for EncoderRetriever {
    fn name(&self) -> &str { &self.name }
    fn key_field(&self) -> &str { &self.key_field }
    fn k(&self) -> Option<usize> { self.k }

    fn search(&self, query: &Query, candidates: Option<&ResultList>, k: Option<usize>) -> Result<ResultList> {
        let mut batch = self.search_batch(std::slice::from_ref(query), candidates.map(std::slice::from_ref), k)?;
        Ok(batch.pop().unwrap_or_default())
    }

    fn search_batch(&self, queries: &[Query], candidates: Option<&[ResultList]>, k: Option<usize>) -> Result<Vec<ResultList>> {
        if let Some(c) = candidates {
            if c.len() != queries.len() {
                return Err(Error::BatchMismatch { stage: self.name.clone(), expected: queries.len(), actual: c.len() });
            }
        }
        if self.table.is_empty() { return Ok(vec![ResultList::new(); queries.len()]); }
        let vectors = embed_queries(self.embedder.as_ref(), queries, &self.name)?;
        Ok(vectors.iter().enumerate().map(|(i, v)| self.rank(v, candidates.map(|c| &c[i]), k)).collect())
    }

    /// Re-adding a key overwrites its embedding.
    fn add(&mut self, documents: &[Document]) -> Result<()> {
        let keys = documents.iter().map(|d| Key::of(d, &self.key_field, &self.name)).collect::<Result<Vec<_>>>()?;
        let texts: Vec<String> = documents.iter().map(|d| sieve_core::types::join_fields(d, &self.on).unwrap_or_default()).collect();
        let vectors = embed_texts(self.embedder.as_ref(), &texts, &self.name)?;
        for (key, vector) in keys.into_iter().zip(vectors) { self.table.upsert(key, vector); }
        tracing::info!(stage = %self.name, added = documents.len(), total = self.table.len(), "encoder index updated");
        Ok(())
    }
}

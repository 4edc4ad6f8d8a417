//! Dense re-ranker.
//!
//! Scores each candidate against the query. The embedding stored by `add`
//! is used when the candidate's key is known; otherwise the candidate's own
//! content fields are embedded, memoised by content hash. The memo holds at
//! most `cache_capacity` vectors and is cleared when full. A candidate with
//! neither is a schema error: put a document mapping stage in front.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sieve_core::{Document, Embedder, Error, Key, Query, Result, ResultList, ScoredItem, Stage};

use crate::query::{embed_queries, embed_texts};
use crate::table::{cosine, EmbeddingTable};

pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

pub struct EncoderRanker {
    name: String,
    key_field: String,
    on: Vec<String>,
    k: Option<usize>,
    embedder: Arc<dyn Embedder>,
    table: EmbeddingTable,
    cache: Mutex<HashMap<String, Vec<f32>>>,
    cache_capacity: usize,
}

fn content_hash(text: &str) -> String { blake3::hash(text.as_bytes()).to_hex().to_string() }

impl EncoderRanker {
    pub fn new(key_field: impl Into<String>, on: Vec<String>, k: Option<usize>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            name: format!("ranker({})", on.join(",")),
            key_field: key_field.into(),
            on,
            k,
            embedder,
            table: EmbeddingTable::new(),
            cache: Mutex::new(HashMap::new()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self { self.name = name.into(); self }

    /// Upper bound on memoised candidate embeddings; `0` disables the memo.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self { self.cache_capacity = capacity; self }

    pub fn len(&self) -> usize { self.table.len() }

    pub fn is_empty(&self) -> bool { self.table.is_empty() }

    /// Number of content hashes memoised for candidates the ranker never indexed.
    pub fn cached(&self) -> usize { self.cache.lock().map(|c| c.len()).unwrap_or(0) }

    /// Embeddings for every candidate, in candidate order.
    fn candidate_vectors(&self, candidates: &ResultList) -> Result<Vec<Vec<f32>>> {
        let poisoned = || Error::backend(&self.name, anyhow::anyhow!("embedding cache poisoned"));
        let mut hashes: Vec<Option<String>> = Vec::with_capacity(candidates.len());
        let mut resolved: HashMap<String, Vec<f32>> = HashMap::new();
        let mut pending: Vec<(String, String)> = Vec::new();
        {
            let cache = self.cache.lock().map_err(|_| poisoned())?;
            for item in candidates {
                if self.table.get(item.key()).is_some() {
                    hashes.push(None);
                    continue;
                }
                let Some(text) = item.text_of(&self.on) else {
                    return Err(Error::schema(
                        &self.name,
                        format!("candidate {} carries none of the fields {:?}; insert a document mapping stage before this ranker", item.key(), self.on),
                    ));
                };
                let hash = content_hash(&text);
                if !resolved.contains_key(&hash) && !pending.iter().any(|(h, _)| h == &hash) {
                    match cache.get(&hash) {
                        Some(vector) => { resolved.insert(hash.clone(), vector.clone()); }
                        None => pending.push((hash.clone(), text)),
                    }
                }
                hashes.push(Some(hash));
            }
        }

        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
            let fresh = embed_texts(self.embedder.as_ref(), &texts, &self.name)?;
            let mut cache = self.cache.lock().map_err(|_| poisoned())?;
            for ((hash, _), vector) in pending.into_iter().zip(fresh) {
                if self.cache_capacity > 0 {
                    if cache.len() >= self.cache_capacity && !cache.contains_key(&hash) {
                        tracing::debug!(stage = %self.name, evicted = cache.len(), "embedding cache full, cleared");
                        cache.clear();
                    }
                    cache.insert(hash.clone(), vector.clone());
                }
                resolved.insert(hash, vector);
            }
        }

        let mut out = Vec::with_capacity(candidates.len());
        for (item, hash) in candidates.iter().zip(hashes) {
            let vector = match hash {
                None => self.table.get(item.key()).map(<[f32]>::to_vec),
                Some(h) => resolved.get(&h).cloned(),
            };
            out.push(vector.ok_or_else(|| Error::backend(&self.name, anyhow::anyhow!("missing embedding for {}", item.key())))?);
        }
        Ok(out)
    }
}

impl Stage for EncoderRanker {
    fn name(&self) -> &str { &self.name }
    fn key_field(&self) -> &str { &self.key_field }
    fn k(&self) -> Option<usize> { self.k }

    fn search(&self, query: &Query, candidates: Option<&ResultList>, k: Option<usize>) -> Result<ResultList> {
        if candidates.is_some_and(ResultList::is_empty) || (candidates.is_none() && self.table.is_empty()) {
            return Ok(ResultList::new());
        }
        let query_vec = embed_queries(self.embedder.as_ref(), std::slice::from_ref(query), &self.name)?.pop().unwrap_or_default();

        let mut scored: Vec<(ScoredItem, f32)> = match candidates {
            Some(c) => {
                let vectors = self.candidate_vectors(c)?;
                c.iter().cloned().zip(vectors).map(|(item, v)| (item, cosine(&query_vec, &v))).collect()
            }
            None => self.table.iter().map(|(key, v)| (ScoredItem::new(&self.key_field, key.clone()), cosine(&query_vec, v))).collect(),
        };
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let mut out: ResultList = scored.into_iter().map(|(item, s)| item.with_similarity(s)).collect();
        out.cap(k.or(self.k));
        tracing::debug!(stage = %self.name, candidates = candidates.map_or(0, ResultList::len), kept = out.len(), "reranked");
        Ok(out)
    }

    /// Re-adding a key overwrites its embedding. Documents must carry at least one content field.
    fn add(&mut self, documents: &[Document]) -> Result<()> {
        let mut keys: Vec<Key> = Vec::with_capacity(documents.len());
        let mut texts = Vec::with_capacity(documents.len());
        for document in documents {
            let key = Key::of(document, &self.key_field, &self.name)?;
            let text = sieve_core::types::join_fields(document, &self.on)
                .ok_or_else(|| Error::schema(&self.name, format!("document {key} carries none of the fields {:?}", self.on)))?;
            keys.push(key);
            texts.push(text);
        }
        let vectors = embed_texts(self.embedder.as_ref(), &texts, &self.name)?;
        for (key, vector) in keys.into_iter().zip(vectors) { self.table.upsert(key, vector); }
        tracing::info!(stage = %self.name, added = documents.len(), total = self.table.len(), "ranker index updated");
        Ok(())
    }
}

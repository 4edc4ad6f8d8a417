#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use sieve_core::{Document, Error, Key, Query, Result, ResultList, ScoredItem, Stage};

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

pub fn list(items: &[(i64, Option<f32>)]) -> ResultList {
    items
        .iter()
        .map(|&(key, similarity)| {
            let item = ScoredItem::new("id", Key::from(key));
            match similarity {
                Some(s) => item.with_similarity(s),
                None => item,
            }
        })
        .collect()
}

pub fn scored(items: &[(i64, f32)]) -> ResultList {
    list(&items.iter().map(|&(k, s)| (k, Some(s))).collect::<Vec<_>>())
}

pub fn ids(list: &ResultList) -> Vec<Key> { list.keys().cloned().collect() }

/// Answers each query text with a canned list, restricted to candidates when given.
#[derive(Clone)]
pub struct Fixed {
    pub name: String,
    pub k: Option<usize>,
    pub answers: HashMap<String, ResultList>,
    pub calls: Arc<AtomicUsize>,
    pub added: Arc<AtomicUsize>,
}

impl Fixed {
    pub fn new(name: &str) -> Self {
        Self { name: name.into(), k: None, answers: HashMap::new(), calls: Arc::default(), added: Arc::default() }
    }

    pub fn answer(mut self, query: &str, list: ResultList) -> Self {
        self.answers.insert(query.into(), list);
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl Stage for Fixed {
    fn name(&self) -> &str { &self.name }
    fn key_field(&self) -> &str { "id" }
    fn k(&self) -> Option<usize> { self.k }

    fn search(&self, query: &Query, candidates: Option<&ResultList>, k: Option<usize>) -> Result<ResultList> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = query.as_text().and_then(|t| self.answers.get(t)).cloned().unwrap_or_default();
        if let Some(c) = candidates { out.retain(|item| c.contains(item.key())); }
        out.cap(k.or(self.k));
        Ok(out)
    }

    fn add(&mut self, documents: &[Document]) -> Result<()> {
        for d in documents { Key::of(d, "id", &self.name)?; }
        self.added.fetch_add(documents.len(), Ordering::SeqCst);
        Ok(())
    }
}

/// Rescores candidates from a fixed table and sorts them, like a cross-encoder would.
pub struct Rescore {
    pub scores: HashMap<Key, f32>,
    pub calls: Arc<AtomicUsize>,
}

impl Rescore {
    pub fn new(scores: &[(i64, f32)]) -> Self {
        Self { scores: scores.iter().map(|&(k, s)| (Key::from(k), s)).collect(), calls: Arc::default() }
    }
}

impl Stage for Rescore {
    fn name(&self) -> &str { "rescore" }
    fn key_field(&self) -> &str { "id" }
    fn k(&self) -> Option<usize> { None }

    fn search(&self, _query: &Query, candidates: Option<&ResultList>, k: Option<usize>) -> Result<ResultList> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(candidates) = candidates else { return Ok(ResultList::new()) };
        let mut out: ResultList = candidates
            .iter()
            .map(|item| item.clone().with_similarity(self.scores.get(item.key()).copied().unwrap_or(0.0)))
            .collect();
        out.sort_by_similarity();
        out.cap(k);
        Ok(out)
    }

    fn add(&mut self, _documents: &[Document]) -> Result<()> { Ok(()) }
}

/// Always fails, at search and at add.
pub struct Broken;

impl Stage for Broken {
    fn name(&self) -> &str { "broken" }
    fn key_field(&self) -> &str { "id" }
    fn k(&self) -> Option<usize> { None }

    fn search(&self, _query: &Query, _candidates: Option<&ResultList>, _k: Option<usize>) -> Result<ResultList> {
        Err(Error::backend("broken", anyhow::anyhow!("index unavailable")))
    }

    fn add(&mut self, _documents: &[Document]) -> Result<()> {
        Err(Error::backend("broken", anyhow::anyhow!("read-only index")))
    }
}

/// Ignores its candidates and returns keys of its own.
pub struct Rogue(pub ResultList);

impl Stage for Rogue {
    fn name(&self) -> &str { "rogue" }
    fn key_field(&self) -> &str { "id" }
    fn k(&self) -> Option<usize> { None }

    fn search(&self, _query: &Query, _candidates: Option<&ResultList>, _k: Option<usize>) -> Result<ResultList> { Ok(self.0.clone()) }

    fn add(&mut self, _documents: &[Document]) -> Result<()> { Ok(()) }
}

/// Returns one list fewer than it was asked for in batch mode.
pub struct Short;

impl Stage for Short {
    fn name(&self) -> &str { "short" }
    fn key_field(&self) -> &str { "id" }
    fn k(&self) -> Option<usize> { None }

    fn search(&self, _query: &Query, _candidates: Option<&ResultList>, _k: Option<usize>) -> Result<ResultList> { Ok(ResultList::new()) }

    fn search_batch(&self, queries: &[Query], _candidates: Option<&[ResultList]>, _k: Option<usize>) -> Result<Vec<ResultList>> {
        Ok(vec![ResultList::new(); queries.len().saturating_sub(1)])
    }

    fn add(&mut self, _documents: &[Document]) -> Result<()> { Ok(()) }
}

/// Leaf keyed on a different field than the rest of the pipeline.
pub struct OtherKey;

impl Stage for OtherKey {
    fn name(&self) -> &str { "other" }
    fn key_field(&self) -> &str { "doc_id" }
    fn k(&self) -> Option<usize> { None }

    fn search(&self, _query: &Query, _candidates: Option<&ResultList>, _k: Option<usize>) -> Result<ResultList> { Ok(ResultList::new()) }

    fn add(&mut self, _documents: &[Document]) -> Result<()> { Ok(()) }
}

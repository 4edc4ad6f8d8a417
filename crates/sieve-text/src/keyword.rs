//! Keyword matcher that emits ordered but unscored results.
//!
//! Documents are ranked by how many distinct query keywords they contain,
//! ties broken by insertion order (or by upstream order when restricted to
//! candidates). Items carry no `similarity`: the order is the signal.
use std::collections::{HashMap, HashSet};

use sieve_core::{Document, Error, Key, Query, Result, ResultList, ScoredItem, Stage};

use crate::analysis::tokenize;

pub struct KeywordRetriever {
    name: String,
    key_field: String,
    on: Vec<String>,
    k: Option<usize>,
    keywords: Option<HashSet<String>>,
    postings: HashMap<String, HashSet<Key>>,
    terms: HashMap<Key, HashSet<String>>,
    position: HashMap<Key, usize>,
}

impl KeywordRetriever {
    pub fn new(key_field: impl Into<String>, on: Vec<String>, k: Option<usize>) -> Self {
        Self {
            name: format!("keyword({})", on.join(",")),
            key_field: key_field.into(),
            on,
            k,
            keywords: None,
            postings: HashMap::new(),
            terms: HashMap::new(),
            position: HashMap::new(),
        }
    }

    /// Only these keywords are ever matched; other query tokens are ignored.
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = Some(keywords.into_iter().flat_map(|k| tokenize(k.as_ref())).collect());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self { self.name = name.into(); self }

    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    fn query_terms(&self, text: &str) -> HashSet<String> {
        tokenize(text)
            .into_iter()
            .filter(|t| self.keywords.as_ref().map_or(true, |kw| kw.contains(t)))
            .collect()
    }

    fn remove(&mut self, key: &Key) {
        let Some(old) = self.terms.remove(key) else { return };
        for term in old {
            if let Some(keys) = self.postings.get_mut(&term) {
                keys.remove(key);
                if keys.is_empty() { self.postings.remove(&term); }
            }
        }
    }
}

impl Stage for KeywordRetriever {
    fn name(&self) -> &str { &self.name }
    fn key_field(&self) -> &str { &self.key_field }
    fn k(&self) -> Option<usize> { self.k }

    fn search(&self, query: &Query, candidates: Option<&ResultList>, k: Option<usize>) -> Result<ResultList> {
        let Some(text) = query.as_text() else {
            return Err(Error::InvalidQuery(format!("{} only accepts text queries, got a {} query", self.name, query.kind())));
        };
        let mut matches: HashMap<&Key, usize> = HashMap::new();
        for term in self.query_terms(text) {
            for key in self.postings.get(&term).into_iter().flatten() {
                *matches.entry(key).or_default() += 1;
            }
        }

        let rank_of: HashMap<&Key, usize> = match candidates {
            Some(c) => c.keys().enumerate().map(|(i, key)| (key, i)).collect(),
            None => self.position.iter().map(|(key, i)| (key, *i)).collect(),
        };
        let mut ranked: Vec<(&Key, usize, usize)> = matches
            .into_iter()
            .filter_map(|(key, hits)| rank_of.get(key).map(|rank| (key, hits, *rank)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        let mut out: ResultList = ranked.into_iter().map(|(key, _, _)| ScoredItem::new(&self.key_field, key.clone())).collect();
        out.cap(k.or(self.k));
        Ok(out)
    }

    /// Re-adding a key replaces its keywords but keeps its original position.
    fn add(&mut self, documents: &[Document]) -> Result<()> {
        let keys = documents.iter().map(|d| Key::of(d, &self.key_field, &self.name)).collect::<Result<Vec<_>>>()?;
        for (document, key) in documents.iter().zip(keys) {
            self.remove(&key);
            let terms: HashSet<String> = sieve_core::types::join_fields(document, &self.on).map(|t| tokenize(&t).into_iter().collect()).unwrap_or_default();
            for term in &terms {
                self.postings.entry(term.clone()).or_default().insert(key.clone());
            }
            let next = self.position.len();
            self.position.entry(key.clone()).or_insert(next);
            self.terms.insert(key, terms);
        }
        tracing::info!(stage = %self.name, added = documents.len(), total = self.len(), "keyword index updated");
        Ok(())
    }
}

//! Pipeline evaluation.
//!
//! Every node is evaluated in batch form: a single query is a batch of one,
//! which keeps single and batched calls on the same code path. `upstream`
//! holds the per-position candidate lists produced by the previous stage of
//! an enclosing chain.
use sieve_core::{Document, Error, Query, QueryInput, Ranked, Result, ResultList, Stage};

use crate::node::Pipeline;
use crate::{union, vote};

const DEFAULT_KEY_FIELD: &str = "id";

fn empty(n: usize) -> Vec<ResultList> { vec![ResultList::new(); n] }

fn check_len(stage: &str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual { Ok(()) } else { Err(Error::BatchMismatch { stage: stage.to_string(), expected, actual }) }
}

/// Drop keys a leaf returned from outside its candidates.
fn restrict(stage: &str, list: &mut ResultList, candidates: &ResultList) {
    let before = list.len();
    list.retain(|item| candidates.contains(item.key()));
    if list.len() != before {
        tracing::warn!(stage, dropped = before - list.len(), "stage returned keys outside its candidates");
    }
}

impl Pipeline {
    /// Run on a single query or a batch; the output mirrors the input shape.
    pub fn run(&self, input: impl Into<QueryInput>, k: Option<usize>) -> Result<Ranked> {
        match input.into() {
            QueryInput::Single(query) => self.search(query, k).map(Ranked::Single),
            QueryInput::Batch(queries) => self.search_batch(&queries, k).map(Ranked::Batch),
        }
    }

    pub fn search(&self, query: impl Into<Query>, k: Option<usize>) -> Result<ResultList> {
        let mut out = self.search_batch(&[query.into()], k)?;
        Ok(out.pop().unwrap_or_default())
    }

    /// One result list per query, in query order. An empty batch is rejected.
    pub fn search_batch(&self, queries: &[Query], k: Option<usize>) -> Result<Vec<ResultList>> {
        if queries.is_empty() { return Err(Error::InvalidQuery("empty query batch".into())); }
        self.validate_root()?;
        self.eval(queries, None, k)
    }

    /// `validate`, plus: nothing upstream feeds the root, so it must not need candidates.
    fn validate_root(&self) -> Result<()> {
        self.validate()?;
        if self.needs_candidates() {
            return Err(Error::InvalidConfig(format!("'{self}' starts with a stage that needs upstream candidates")));
        }
        Ok(())
    }

    pub(crate) fn eval(&self, queries: &[Query], upstream: Option<&[ResultList]>, k: Option<usize>) -> Result<Vec<ResultList>> {
        if let Some(c) = upstream { check_len(self.kind(), queries.len(), c.len())?; }
        let out = match self {
            Pipeline::Leaf(stage) => eval_leaf(stage.as_ref(), queries, upstream, k)?,
            Pipeline::Sequential(stages) => eval_chain(stages, queries, upstream, k)?,
            Pipeline::Union { branches, k: own } => {
                let outputs = eval_branches(branches, queries, upstream)?;
                (0..queries.len()).map(|i| union::merge(outputs.iter().map(|b| &b[i]), k.or(*own))).collect()
            }
            Pipeline::Vote { branches, k: own, normalization } => {
                let outputs = eval_branches(branches, queries, upstream)?;
                (0..queries.len()).map(|i| vote::merge(outputs.iter().map(|b| &b[i]), *normalization, k.or(*own))).collect()
            }
            Pipeline::Mapping(map) => {
                let candidates = upstream.ok_or_else(|| Error::InvalidConfig("a document mapping stage needs an upstream stage".into()))?;
                candidates
                    .iter()
                    .map(|c| {
                        let mut list = map.apply(c);
                        list.cap(k);
                        list
                    })
                    .collect()
            }
            Pipeline::TopK(n) => {
                let candidates = upstream.ok_or_else(|| Error::InvalidConfig("a top-k stage needs an upstream stage".into()))?;
                let n = k.unwrap_or(*n);
                candidates
                    .iter()
                    .map(|c| {
                        let mut list = c.clone();
                        list.truncate(n);
                        list
                    })
                    .collect()
            }
        };
        tracing::debug!(node = %self, queries = queries.len(), results = out.iter().map(ResultList::len).sum::<usize>(), "evaluated");
        Ok(out)
    }
}

fn eval_leaf(stage: &dyn Stage, queries: &[Query], upstream: Option<&[ResultList]>, k: Option<usize>) -> Result<Vec<ResultList>> {
    let k = k.or(stage.k());
    let Some(candidates) = upstream else {
        let mut out = stage.search_batch(queries, None, k)?;
        check_len(stage.name(), queries.len(), out.len())?;
        for list in &mut out { list.cap(k); }
        return Ok(out);
    };

    // positions with no candidates never reach the stage
    let live: Vec<usize> = (0..queries.len()).filter(|&i| !candidates[i].is_empty()).collect();
    let mut out = empty(queries.len());
    if live.is_empty() { return Ok(out); }
    let hits = if live.len() == queries.len() {
        stage.search_batch(queries, Some(candidates), k)?
    } else {
        let subset_queries: Vec<Query> = live.iter().map(|&i| queries[i].clone()).collect();
        let subset_candidates: Vec<ResultList> = live.iter().map(|&i| candidates[i].clone()).collect();
        stage.search_batch(&subset_queries, Some(&subset_candidates), k)?
    };
    check_len(stage.name(), live.len(), hits.len())?;
    for (i, mut list) in live.into_iter().zip(hits) {
        restrict(stage.name(), &mut list, &candidates[i]);
        list.cap(k);
        out[i] = list;
    }
    Ok(out)
}

/// Intermediate stages run with their own cap; the call's `k` applies to the last.
fn eval_chain(stages: &[Pipeline], queries: &[Query], upstream: Option<&[ResultList]>, k: Option<usize>) -> Result<Vec<ResultList>> {
    let mut current: Option<Vec<ResultList>> = upstream.map(<[ResultList]>::to_vec);
    for (i, stage) in stages.iter().enumerate() {
        if current.as_ref().is_some_and(|c| c.iter().all(ResultList::is_empty)) {
            tracing::debug!(skipped = stages.len() - i, "no candidates left, chain short-circuited");
            break;
        }
        let stage_k = if i + 1 == stages.len() { k } else { None };
        current = Some(stage.eval(queries, current.as_deref(), stage_k)?);
    }
    Ok(current.unwrap_or_else(|| empty(queries.len())))
}

/// Branches see the same queries and candidates; the first error aborts.
fn eval_branches(branches: &[Pipeline], queries: &[Query], upstream: Option<&[ResultList]>) -> Result<Vec<Vec<ResultList>>> {
    branches.iter().map(|branch| branch.eval(queries, upstream, None)).collect()
}

/// A pipeline is itself a stage and may be nested as a leaf of another one.
impl Stage for Pipeline {
    fn name(&self) -> &str {
        match self {
            Pipeline::Leaf(stage) => stage.name(),
            other => other.kind(),
        }
    }

    fn key_field(&self) -> &str { Pipeline::key_field(self).unwrap_or(DEFAULT_KEY_FIELD) }

    fn k(&self) -> Option<usize> {
        match self {
            Pipeline::Leaf(stage) => stage.k(),
            Pipeline::Union { k, .. } | Pipeline::Vote { k, .. } => *k,
            Pipeline::TopK(n) => Some(*n),
            Pipeline::Mapping(_) => None,
            Pipeline::Sequential(stages) => stages.last().and_then(<Pipeline as Stage>::k),
        }
    }

    fn search(&self, query: &Query, candidates: Option<&ResultList>, k: Option<usize>) -> Result<ResultList> {
        let mut out = Stage::search_batch(self, std::slice::from_ref(query), candidates.map(std::slice::from_ref), k)?;
        Ok(out.pop().unwrap_or_default())
    }

    fn search_batch(&self, queries: &[Query], candidates: Option<&[ResultList]>, k: Option<usize>) -> Result<Vec<ResultList>> {
        if candidates.is_some() { self.validate()?; } else { self.validate_root()?; }
        self.eval(queries, candidates, k)
    }

    fn add(&mut self, documents: &[Document]) -> Result<()> { Pipeline::add(self, documents) }
}

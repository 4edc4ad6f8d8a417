//! The pipeline tree and its builders.
//!
//! Building a pipeline never executes anything; it only arranges stages.
//! Leaves are arbitrary `Stage`s, inner nodes are combinators.
use std::fmt;

use sieve_core::{Document, Error, Normalization, Result, Stage};

use crate::mapping::DocumentMap;

pub enum Pipeline {
    /// A retriever or ranker.
    Leaf(Box<dyn Stage>),
    /// Each stage searches only within the previous stage's output.
    Sequential(Vec<Pipeline>),
    /// First occurrence per key wins, branches in declaration order.
    Union { branches: Vec<Pipeline>, k: Option<usize> },
    /// Mean of per-branch normalised scores.
    Vote { branches: Vec<Pipeline>, k: Option<usize>, normalization: Normalization },
    Mapping(DocumentMap),
    TopK(usize),
}

pub fn leaf(stage: impl Stage + 'static) -> Pipeline { Pipeline::Leaf(Box::new(stage)) }

/// Sequential composition; nested chains are flattened.
pub fn chain(stages: impl IntoIterator<Item = Pipeline>) -> Pipeline {
    let mut flat = Vec::new();
    for stage in stages {
        match stage {
            Pipeline::Sequential(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    Pipeline::Sequential(flat)
}

pub fn union(branches: impl IntoIterator<Item = Pipeline>) -> Pipeline {
    Pipeline::Union { branches: branches.into_iter().collect(), k: None }
}

pub fn vote(branches: impl IntoIterator<Item = Pipeline>) -> Pipeline {
    Pipeline::Vote { branches: branches.into_iter().collect(), k: None, normalization: Normalization::default() }
}

/// Document-mapping stage; fails when a document lacks `key_field`.
pub fn mapping(key_field: impl Into<String>, documents: &[Document]) -> Result<Pipeline> {
    Ok(Pipeline::Mapping(DocumentMap::new(key_field, documents)?))
}

pub fn top_k(k: usize) -> Pipeline { Pipeline::TopK(k) }

impl Pipeline {
    /// `self` followed by `next`.
    #[must_use]
    pub fn then(self, next: Pipeline) -> Pipeline { chain([self, next]) }

    /// Cap the output: sets a union/vote's own `k`, otherwise appends a Top-K stage.
    #[must_use]
    pub fn with_k(self, k: usize) -> Pipeline {
        match self {
            Pipeline::Union { branches, .. } => Pipeline::Union { branches, k: Some(k) },
            Pipeline::Vote { branches, normalization, .. } => Pipeline::Vote { branches, k: Some(k), normalization },
            other => other.then(top_k(k)),
        }
    }

    /// Only meaningful on a vote node; other nodes are returned unchanged.
    #[must_use]
    pub fn with_normalization(self, normalization: Normalization) -> Pipeline {
        match self {
            Pipeline::Vote { branches, k, .. } => Pipeline::Vote { branches, k, normalization },
            other => other,
        }
    }

    /// Key field shared by every leaf and mapping stage, if any names one.
    pub fn key_field(&self) -> Option<&str> {
        match self {
            Pipeline::Leaf(stage) => Some(stage.key_field()),
            Pipeline::Mapping(map) => Some(map.key_field()),
            Pipeline::TopK(_) => None,
            Pipeline::Sequential(children) | Pipeline::Union { branches: children, .. } | Pipeline::Vote { branches: children, .. } => {
                children.iter().find_map(Pipeline::key_field)
            }
        }
    }

    /// Structural checks: no empty combinator, one key field across the tree.
    pub fn validate(&self) -> Result<()> {
        let mut key_field: Option<&str> = None;
        self.validate_into(&mut key_field)
    }

    fn validate_into<'a>(&'a self, key_field: &mut Option<&'a str>) -> Result<()> {
        let (field, who) = match self {
            Pipeline::Leaf(stage) => (stage.key_field(), stage.name()),
            Pipeline::Mapping(map) => (map.key_field(), crate::mapping::MAPPING_STAGE),
            Pipeline::TopK(_) => return Ok(()),
            Pipeline::Sequential(children) | Pipeline::Union { branches: children, .. } | Pipeline::Vote { branches: children, .. } => {
                if children.is_empty() { return Err(Error::InvalidConfig(format!("empty {}", self.kind()))); }
                return children.iter().try_for_each(|c| c.validate_into(key_field));
            }
        };
        match *key_field {
            Some(seen) if seen != field => Err(Error::InvalidConfig(format!("{who} uses key field '{field}' but the pipeline uses '{seen}'"))),
            _ => {
                *key_field = Some(field);
                Ok(())
            }
        }
    }

    /// Whether the node can only run on upstream candidates. Such a node is
    /// rejected as the root of a call, before any stage runs.
    pub fn needs_candidates(&self) -> bool {
        match self {
            Pipeline::Leaf(_) => false,
            Pipeline::Mapping(_) | Pipeline::TopK(_) => true,
            Pipeline::Sequential(stages) => stages.first().is_some_and(Pipeline::needs_candidates),
            Pipeline::Union { branches, .. } | Pipeline::Vote { branches, .. } => branches.iter().any(Pipeline::needs_candidates),
        }
    }

    /// Forward `documents` to every leaf. Mapping and Top-K stages hold no index.
    pub fn add(&mut self, documents: &[Document]) -> Result<()> {
        self.validate()?;
        self.add_unchecked(documents)
    }

    pub(crate) fn add_unchecked(&mut self, documents: &[Document]) -> Result<()> {
        match self {
            Pipeline::Leaf(stage) => stage.add(documents),
            Pipeline::Mapping(_) | Pipeline::TopK(_) => Ok(()),
            Pipeline::Sequential(children) | Pipeline::Union { branches: children, .. } | Pipeline::Vote { branches: children, .. } => {
                children.iter_mut().try_for_each(|c| c.add_unchecked(documents))
            }
        }
    }

    /// Replace the lookup table of every mapping stage in the tree.
    pub fn rebind(&mut self, documents: &[Document]) -> Result<()> {
        match self {
            Pipeline::Mapping(map) => map.rebind(documents),
            Pipeline::Leaf(_) | Pipeline::TopK(_) => Ok(()),
            Pipeline::Sequential(children) | Pipeline::Union { branches: children, .. } | Pipeline::Vote { branches: children, .. } => {
                children.iter_mut().try_for_each(|c| c.rebind(documents))
            }
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Pipeline::Leaf(_) => "leaf",
            Pipeline::Sequential(_) => "sequential",
            Pipeline::Union { .. } => "union",
            Pipeline::Vote { .. } => "vote",
            Pipeline::Mapping(_) => "mapping",
            Pipeline::TopK(_) => "top_k",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, children: &[Pipeline], sep: &str| -> fmt::Result {
            for (i, c) in children.iter().enumerate() {
                if i > 0 { f.write_str(sep)?; }
                write!(f, "{c}")?;
            }
            Ok(())
        };
        match self {
            Pipeline::Leaf(stage) => f.write_str(stage.name()),
            Pipeline::Mapping(_) => f.write_str(crate::mapping::MAPPING_STAGE),
            Pipeline::TopK(k) => write!(f, "top_k({k})"),
            Pipeline::Sequential(stages) => join(f, stages, " + "),
            Pipeline::Union { branches, k } => {
                f.write_str("(")?;
                join(f, branches, " | ")?;
                f.write_str(")")?;
                if let Some(k) = k { write!(f, "[k={k}]")?; }
                Ok(())
            }
            Pipeline::Vote { branches, k, .. } => {
                f.write_str("(")?;
                join(f, branches, " * ")?;
                f.write_str(")")?;
                if let Some(k) = k { write!(f, "[k={k}]")?; }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Pipeline({self})") }
}

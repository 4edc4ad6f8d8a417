//! Data model shared by every stage.
//!
//! A `Document` is an ordered JSON object. Every stage boundary joins on the
//! `Key` pulled out of the pipeline's key field; field values never take part
//! in identity.

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};

pub type Document = Map<String, Value>;

/// Field name under which an item's score is exposed to callers.
pub const SIMILARITY_FIELD: &str = "similarity";

/// Join identity of a document across stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    /// Integers and strings are valid keys; anything else is not.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::from(*i),
            Key::Str(s) => Value::String(s.clone()),
        }
    }

    /// Text form for backends that store keys as strings; the prefix keeps `1` and `"1"` apart.
    pub fn encode(&self) -> String {
        match self {
            Key::Int(i) => format!("i:{i}"),
            Key::Str(s) => format!("s:{s}"),
        }
    }

    pub fn decode(raw: &str) -> Option<Self> {
        if let Some(rest) = raw.strip_prefix("i:") { return rest.parse().ok().map(Key::Int); }
        raw.strip_prefix("s:").map(|rest| Key::Str(rest.to_string()))
    }

    /// Extract the key of `document`, failing with a schema error naming `stage`.
    pub fn of(document: &Document, key_field: &str, stage: &str) -> Result<Self> {
        match document.get(key_field) {
            None => Err(Error::schema(stage, format!("document lacks key field '{key_field}'"))),
            Some(v) => Self::from_value(v).ok_or_else(|| Error::schema(stage, format!("key field '{key_field}' holds {v}, expected an integer or string"))),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key { fn from(v: i64) -> Self { Key::Int(v) } }
impl From<i32> for Key { fn from(v: i32) -> Self { Key::Int(i64::from(v)) } }
impl From<&str> for Key { fn from(v: &str) -> Self { Key::Str(v.to_string()) } }
impl From<String> for Key { fn from(v: String) -> Self { Key::Str(v) } }

/// A partial or full document as emitted by a stage.
///
/// `fields` always carries the key field. `similarity` is whatever the
/// producing stage assigned; order-only stages leave it `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    key: Key,
    pub fields: Document,
    pub similarity: Option<f32>,
}

impl ScoredItem {
    /// Bare-key item: only the key field is populated.
    pub fn new(key_field: &str, key: Key) -> Self {
        let mut fields = Map::new();
        fields.insert(key_field.to_string(), key.to_value());
        Self { key, fields, similarity: None }
    }

    pub fn from_document(document: &Document, key_field: &str, stage: &str) -> Result<Self> {
        let key = Key::of(document, key_field, stage)?;
        Ok(Self { key, fields: document.clone(), similarity: None })
    }

    #[must_use]
    pub fn with_similarity(mut self, similarity: f32) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn key(&self) -> &Key { &self.key }

    /// Content of `fields` joined by a space, or `None` when none of them is present.
    pub fn text_of(&self, fields: &[String]) -> Option<String> { join_fields(&self.fields, fields) }

    /// Flatten into the caller-facing mapping, `similarity` included when set.
    pub fn to_document(&self) -> Document {
        let mut out = self.fields.clone();
        if let Some(s) = self.similarity {
            out.insert(SIMILARITY_FIELD.to_string(), Value::from(f64::from(s)));
        }
        out
    }
}

impl Serialize for ScoredItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

/// Join the string renderings of `fields` found in `document`.
pub fn join_fields(document: &Document, fields: &[String]) -> Option<String> {
    let parts: Vec<String> = fields
        .iter()
        .filter_map(|f| document.get(f))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    if parts.is_empty() { None } else { Some(parts.join(" ")) }
}

/// Ordered, key-unique list of items, most relevant first.
///
/// Uniqueness is enforced on insertion: a second item with an already seen
/// key is dropped, so the earliest version always wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultList {
    items: Vec<ScoredItem>,
    seen: HashSet<Key>,
}

impl ResultList {
    pub fn new() -> Self { Self::default() }

    /// Append `item` unless its key is already present. Returns whether it was kept.
    pub fn push(&mut self, item: ScoredItem) -> bool {
        if self.seen.contains(item.key()) { return false; }
        self.seen.insert(item.key().clone());
        self.items.push(item);
        true
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn contains(&self, key: &Key) -> bool { self.seen.contains(key) }
    pub fn get(&self, key: &Key) -> Option<&ScoredItem> { self.items.iter().find(|i| i.key() == key) }
    pub fn items(&self) -> &[ScoredItem] { &self.items }
    pub fn iter(&self) -> std::slice::Iter<'_, ScoredItem> { self.items.iter() }
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ScoredItem> { self.items.iter_mut() }
    pub fn keys(&self) -> impl Iterator<Item = &Key> + '_ { self.items.iter().map(ScoredItem::key) }
    pub fn into_items(self) -> Vec<ScoredItem> { self.items }

    /// True when every item carries a similarity (vacuously true when empty).
    pub fn is_scored(&self) -> bool { self.items.iter().all(|i| i.similarity.is_some()) }

    pub fn truncate(&mut self, k: usize) {
        if self.items.len() <= k { return; }
        for dropped in self.items.drain(k..) { self.seen.remove(dropped.key()); }
    }

    /// Truncate when a cap is configured; `None` keeps everything.
    pub fn cap(&mut self, k: Option<usize>) {
        if let Some(k) = k { self.truncate(k); }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&ScoredItem) -> bool) {
        let seen = &mut self.seen;
        self.items.retain(|item| {
            let kept = keep(item);
            if !kept { seen.remove(item.key()); }
            kept
        });
    }

    /// Sort by similarity descending; unscored items sink, ties keep their order.
    pub fn sort_by_similarity(&mut self) {
        self.items.sort_by(|a, b| {
            let a = a.similarity.unwrap_or(f32::NEG_INFINITY);
            let b = b.similarity.unwrap_or(f32::NEG_INFINITY);
            b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.items.iter().map(|i| Value::Object(i.to_document())).collect())
    }
}

impl FromIterator<ScoredItem> for ResultList {
    fn from_iter<I: IntoIterator<Item = ScoredItem>>(iter: I) -> Self {
        let mut list = ResultList::new();
        for item in iter { list.push(item); }
        list
    }
}

impl IntoIterator for ResultList {
    type Item = ScoredItem;
    type IntoIter = std::vec::IntoIter<ScoredItem>;
    fn into_iter(self) -> Self::IntoIter { self.items.into_iter() }
}

impl<'a> IntoIterator for &'a ResultList {
    type Item = &'a ScoredItem;
    type IntoIter = std::slice::Iter<'a, ScoredItem>;
    fn into_iter(self) -> Self::IntoIter { self.items.iter() }
}

impl Serialize for ResultList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in &self.items { seq.serialize_element(item)?; }
        seq.end()
    }
}

/// A single query value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Query {
    Text(String),
    Vector(Vec<f32>),
}

impl Query {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Query::Text(t) => Some(t),
            Query::Vector(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Query::Text(_) => "text",
            Query::Vector(_) => "vector",
        }
    }
}

impl From<&str> for Query { fn from(v: &str) -> Self { Query::Text(v.to_string()) } }
impl From<String> for Query { fn from(v: String) -> Self { Query::Text(v) } }
impl From<Vec<f32>> for Query { fn from(v: Vec<f32>) -> Self { Query::Vector(v) } }

/// Shape of a pipeline call; the output mirrors it.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    Single(Query),
    Batch(Vec<Query>),
}

impl From<Query> for QueryInput { fn from(q: Query) -> Self { QueryInput::Single(q) } }
impl From<&str> for QueryInput { fn from(q: &str) -> Self { QueryInput::Single(q.into()) } }
impl From<String> for QueryInput { fn from(q: String) -> Self { QueryInput::Single(q.into()) } }
impl From<Vec<Query>> for QueryInput { fn from(qs: Vec<Query>) -> Self { QueryInput::Batch(qs) } }
impl From<Vec<&str>> for QueryInput {
    fn from(qs: Vec<&str>) -> Self { QueryInput::Batch(qs.into_iter().map(Query::from).collect()) }
}

/// One result list for a single query, one per position for a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Ranked {
    Single(ResultList),
    Batch(Vec<ResultList>),
}

impl Ranked {
    pub fn into_single(self) -> Option<ResultList> {
        match self {
            Ranked::Single(list) => Some(list),
            Ranked::Batch(_) => None,
        }
    }

    /// Batch view; a single result becomes a batch of one.
    pub fn into_batch(self) -> Vec<ResultList> {
        match self {
            Ranked::Single(list) => vec![list],
            Ranked::Batch(lists) => lists,
        }
    }
}

/// Per-branch score normalisation used by vote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `s / max`, falling back to min-max when the branch maximum is not positive.
    #[default]
    Max,
    /// `(s - min) / (max - min)`.
    MinMax,
}

//! BM25 retriever over an in-memory tantivy index.
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, QueryParser, TermSetQuery};
use tantivy::schema::{Field, Value};
use tantivy::{doc, Index, IndexReader, ReloadPolicy, TantivyDocument, Term};

use sieve_core::{Document, Error, Key, Query, Result, ResultList, ScoredItem, Stage};

use crate::analysis::{build_schema, register_tokenizer, KEY_FIELD, TEXT_FIELD};

const WRITER_MEMORY: usize = 50_000_000;

pub struct LexicalRetriever {
	name: String,
	key_field: String,
	on: Vec<String>,
	k: Option<usize>,
	index: Index,
	reader: IndexReader,
	key: Field,
	text: Field,
}

impl LexicalRetriever {
	/// `on` names the document fields whose text is indexed (joined by a space).
	pub fn new(key_field: impl Into<String>, on: Vec<String>, k: Option<usize>) -> Result<Self> {
		let name = format!("lexical({})", on.join(","));
		let schema = build_schema();
		let index = Index::create_in_ram(schema.clone());
		register_tokenizer(&index);
		let reader: IndexReader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(|e| Error::backend(&name, e))?;
		let key = schema.get_field(KEY_FIELD).map_err(|e| Error::backend(&name, e))?;
		let text = schema.get_field(TEXT_FIELD).map_err(|e| Error::backend(&name, e))?;
		Ok(Self { name, key_field: key_field.into(), on, k, index, reader, key, text })
	}

	#[must_use]
	pub fn with_name(mut self, name: impl Into<String>) -> Self { self.name = name.into(); self }

	/// Number of live documents in the index.
	pub fn len(&self) -> usize { usize::try_from(self.reader.searcher().num_docs()).unwrap_or(usize::MAX) }

	pub fn is_empty(&self) -> bool { self.len() == 0 }

	fn backend(&self, e: impl Into<anyhow::Error>) -> Error { Error::backend(&self.name, e) }
}

impl Stage for LexicalRetriever {
	fn name(&self) -> &str { &self.name }
	fn key_field(&self) -> &str { &self.key_field }
	fn k(&self) -> Option<usize> { self.k }

	fn search(&self, query: &Query, candidates: Option<&ResultList>, k: Option<usize>) -> Result<ResultList> {
		let Some(text) = query.as_text() else {
			return Err(Error::InvalidQuery(format!("{} only accepts text queries, got a {} query", self.name, query.kind())));
		};
		let searcher = self.reader.searcher();
		let universe = match candidates {
			Some(c) => c.len(),
			None => usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX),
		};
		let limit = k.or(self.k).map_or(universe, |k| k.min(universe));
		if limit == 0 { return Ok(ResultList::new()); }

		let parser = QueryParser::for_index(&self.index, vec![self.text]);
		let (parsed, errors) = parser.parse_query_lenient(text);
		if !errors.is_empty() { tracing::debug!(stage = %self.name, errors = errors.len(), "lenient query parse dropped clauses"); }
		let query: Box<dyn tantivy::query::Query> = match candidates {
			None => parsed,
			Some(c) => {
				let terms = c.keys().map(|key| Term::from_field_text(self.key, &key.encode()));
				// filter only: a scoring clause would shift every BM25 score
				let restrict: Box<dyn tantivy::query::Query> = Box::new(ConstScoreQuery::new(Box::new(TermSetQuery::new(terms)), 0.0));
				Box::new(BooleanQuery::new(vec![(Occur::Must, parsed), (Occur::Must, restrict)]))
			}
		};

		let top_docs = searcher.search(query.as_ref(), &TopDocs::with_limit(limit)).map_err(|e| self.backend(e))?;
		let mut hits = ResultList::new();
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(|e| self.backend(e))?;
			let Some(key) = doc.get_first(self.key).and_then(|v| v.as_str()).and_then(Key::decode) else { continue };
			hits.push(ScoredItem::new(&self.key_field, key).with_similarity(score));
		}
		tracing::debug!(stage = %self.name, hits = hits.len(), "lexical search");
		Ok(hits)
	}

	/// Re-adding a key replaces the previous version of that document.
	fn add(&mut self, documents: &[Document]) -> Result<()> {
		if documents.is_empty() { return Ok(()); }
		let keys = documents.iter().map(|d| Key::of(d, &self.key_field, &self.name)).collect::<Result<Vec<_>>>()?;
		let mut writer = self.index.writer_with_num_threads(1, WRITER_MEMORY).map_err(|e| self.backend(e))?;
		for (document, key) in documents.iter().zip(&keys) {
			let encoded = key.encode();
			writer.delete_term(Term::from_field_text(self.key, &encoded));
			let content = sieve_core::types::join_fields(document, &self.on).unwrap_or_default();
			writer.add_document(doc!(self.key => encoded, self.text => content)).map_err(|e| self.backend(e))?;
		}
		writer.commit().map_err(|e| self.backend(e))?;
		self.reader.reload().map_err(|e| self.backend(e))?;
		tracing::info!(stage = %self.name, added = documents.len(), total = self.len(), "lexical index updated");
		Ok(())
	}
}

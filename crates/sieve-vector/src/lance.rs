//! Dense retriever whose embeddings live in a LanceDB table.
//!
//! The table handle is this leaf's private index. Calls block on a runtime
//! owned by the retriever, so it must not be driven from inside another
//! tokio runtime.
use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};
use tokio::runtime::Runtime;

use sieve_core::{Document, Embedder, Error, Key, Query, Result, ResultList, ScoredItem, Stage};

use crate::query::{embed_queries, embed_texts};

const KEY_COLUMN: &str = "key";
const CONTENT_COLUMN: &str = "content";
const VECTOR_COLUMN: &str = "vector";

pub struct LanceRetriever {
	name: String,
	key_field: String,
	on: Vec<String>,
	k: Option<usize>,
	embedder: Arc<dyn Embedder>,
	runtime: Runtime,
	db: Connection,
	table_name: String,
}

impl LanceRetriever {
	pub fn open(uri: &str, table_name: &str, key_field: impl Into<String>, on: Vec<String>, k: Option<usize>, embedder: Arc<dyn Embedder>) -> Result<Self> {
		let name = format!("lance({table_name})");
		let runtime = Runtime::new().map_err(|e| Error::backend(&name, e))?;
		let db = runtime.block_on(async { connect(uri).execute().await }).map_err(|e| Error::backend(&name, e))?;
		Ok(Self { name, key_field: key_field.into(), on, k, embedder, runtime, db, table_name: table_name.to_string() })
	}

	/// Rows currently stored; zero when the table does not exist yet.
	pub fn len(&self) -> Result<usize> {
		self.runtime.block_on(async {
			if !self.table_exists().await? { return Ok(0); }
			let table = self.db.open_table(&self.table_name).execute().await?;
			Ok::<usize, anyhow::Error>(table.count_rows(None).await?)
		}).map_err(|e| self.backend(e))
	}

	pub fn is_empty(&self) -> Result<bool> { Ok(self.len()? == 0) }

	fn backend(&self, e: impl Into<anyhow::Error>) -> Error { Error::backend(&self.name, e) }

	fn schema(&self) -> Arc<Schema> {
		#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
		let dim = self.embedder.dim() as i32;
		Arc::new(Schema::new(vec![
			Field::new(KEY_COLUMN, DataType::Utf8, false),
			Field::new(CONTENT_COLUMN, DataType::Utf8, false),
			Field::new(VECTOR_COLUMN, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
		]))
	}

	async fn table_exists(&self) -> anyhow::Result<bool> {
		Ok(self.db.table_names().execute().await?.contains(&self.table_name))
	}

	fn to_record_batch(&self, keys: &[Key], texts: Vec<String>, vectors: Vec<Vec<f32>>) -> anyhow::Result<RecordBatch> {
		let schema = self.schema();
		#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
		let dim = self.embedder.dim() as i32;
		let encoded: Vec<String> = keys.iter().map(Key::encode).collect();
		let vectors = vectors.into_iter().map(|v| Some(v.into_iter().map(Some).collect::<Vec<_>>()));
		Ok(RecordBatch::try_new(schema, vec![
			Arc::new(StringArray::from(encoded)),
			Arc::new(StringArray::from(texts)),
			Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors, dim)),
		])?)
	}

	async fn nearest(&self, query_vec: Vec<f32>, candidates: Option<&ResultList>, limit: usize) -> anyhow::Result<ResultList> {
		let table = self.db.open_table(&self.table_name).execute().await?;
		let mut search = table.vector_search(query_vec)?.distance_type(DistanceType::Cosine).limit(limit);
		if let Some(c) = candidates {
			let list = c.keys().map(|k| format!("'{}'", k.encode().replace('\'', "''"))).collect::<Vec<_>>().join(", ");
			search = search.only_if(format!("{KEY_COLUMN} IN ({list})"));
		}
		let mut stream = search.execute().await?;
		let mut hits = ResultList::new();
		while let Some(batch) = stream.try_next().await? {
			let keys = batch.column_by_name(KEY_COLUMN).and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow::anyhow!("'{KEY_COLUMN}' column missing"))?;
			let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
			for i in 0..batch.num_rows() {
				let Some(key) = Key::decode(keys.value(i)) else { continue };
				let similarity = distances.map_or(0.0, |d| if d.is_null(i) { 0.0 } else { 1.0 - d.value(i) });
				hits.push(ScoredItem::new(&self.key_field, key).with_similarity(similarity));
			}
		}
		hits.sort_by_similarity();
		Ok(hits)
	}
}

impl Stage for LanceRetriever {
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
		let rows = self.len()?;
		if rows == 0 { return Ok(vec![ResultList::new(); queries.len()]); }
		let vectors = embed_queries(self.embedder.as_ref(), queries, &self.name)?;
		let mut out = Vec::with_capacity(queries.len());
		for (i, query_vec) in vectors.into_iter().enumerate() {
			let restrict = candidates.map(|c| &c[i]);
			let universe = restrict.map_or(rows, ResultList::len);
			let limit = k.or(self.k).map_or(universe, |k| k.min(universe));
			if limit == 0 { out.push(ResultList::new()); continue; }
			let hits = self.runtime.block_on(self.nearest(query_vec, restrict, limit)).map_err(|e| self.backend(e))?;
			out.push(hits);
		}
		Ok(out)
	}

	/// Upserts on the key column: re-adding a key overwrites its row.
	fn add(&mut self, documents: &[Document]) -> Result<()> {
		if documents.is_empty() { return Ok(()); }
		let keys = documents.iter().map(|d| Key::of(d, &self.key_field, &self.name)).collect::<Result<Vec<_>>>()?;
		let texts: Vec<String> = documents.iter().map(|d| sieve_core::types::join_fields(d, &self.on).unwrap_or_default()).collect();
		let vectors = embed_texts(self.embedder.as_ref(), &texts, &self.name)?;
		let batch = self.to_record_batch(&keys, texts, vectors).map_err(|e| self.backend(e))?;
		let schema = self.schema();
		self.runtime.block_on(async {
			let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
			if self.table_exists().await? {
				let table = self.db.open_table(&self.table_name).execute().await?;
				let mut merge = table.merge_insert(&[KEY_COLUMN]);
				merge.when_matched_update_all(None).when_not_matched_insert_all();
				merge.execute(reader).await?;
			} else {
				self.db.create_table(&self.table_name, reader).execute().await?;
			}
			Ok::<(), anyhow::Error>(())
		}).map_err(|e| self.backend(e))?;
		tracing::info!(stage = %self.name, added = documents.len(), "lance table updated");
		Ok(())
	}
}

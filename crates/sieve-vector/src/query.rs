use sieve_core::{Embedder, Error, Query, Result};

/// Turn queries into vectors: text is embedded in one batch, vectors pass
/// through after a dimension check.
pub fn embed_queries(embedder: &dyn Embedder, queries: &[Query], stage: &str) -> Result<Vec<Vec<f32>>> {
    let texts: Vec<String> = queries.iter().filter_map(Query::as_text).map(str::to_string).collect();
    let mut embedded = embed_texts(embedder, &texts, stage)?;
    embedded.reverse();

    let mut out = Vec::with_capacity(queries.len());
    for query in queries {
        match query {
            Query::Text(_) => out.extend(embedded.pop()),
            Query::Vector(v) if v.len() == embedder.dim() => out.push(v.clone()),
            Query::Vector(v) => {
                return Err(Error::InvalidQuery(format!("{stage} expects {}-dimensional query vectors, got {}", embedder.dim(), v.len())));
            }
        }
    }
    Ok(out)
}

pub fn embed_texts(embedder: &dyn Embedder, texts: &[String], stage: &str) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() { return Ok(vec![]); }
    let vectors = embedder.embed_batch(texts).map_err(|e| Error::backend(stage, e))?;
    if vectors.len() != texts.len() {
        return Err(Error::backend(stage, anyhow::anyhow!("embedder returned {} vectors for {} texts", vectors.len(), texts.len())));
    }
    Ok(vectors)
}

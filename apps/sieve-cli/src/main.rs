use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use sieve_core::config::{expand_path, Config, PipelineConfig};
use sieve_core::loader::load_documents;
use sieve_core::{Document, Embedder, Query, QueryInput};
use sieve_embed::default_embedder;
use sieve_pipeline::{chain, leaf, mapping, union, vote, Pipeline};
use sieve_text::LexicalRetriever;
use sieve_vector::{EncoderRanker, EncoderRetriever, LanceRetriever};

const ADD_BATCH: usize = 256;

struct Args {
    corpus: Option<PathBuf>,
    lance: Option<PathBuf>,
    k: Option<usize>,
    vote: bool,
    queries: Vec<String>,
}

fn usage() -> ! {
    eprintln!("Usage: sieve [--corpus <dir|file.jsonl>] [--lance <dir>] [--k <n>] [--vote] <query>...");
    eprintln!("Example: sieve --corpus ../dev_data/txt 'start a fire' 'purify water'");
    std::process::exit(1);
}

fn parse_args() -> Args {
    let raw: Vec<String> = env::args().skip(1).collect();
    let mut args = Args { corpus: None, lance: None, k: None, vote: false, queries: Vec::new() };
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--corpus" | "-c" => { i += 1; args.corpus = Some(raw.get(i).map(expand_path).unwrap_or_else(|| usage())); }
            "--lance" => { i += 1; args.lance = Some(raw.get(i).map(expand_path).unwrap_or_else(|| usage())); }
            "--k" | "-k" => { i += 1; args.k = Some(raw.get(i).and_then(|v| v.parse().ok()).unwrap_or_else(|| usage())); }
            "--vote" => args.vote = true,
            "--help" | "-h" => usage(),
            other if other.starts_with('-') => { eprintln!("Unknown flag: {other}"); usage() }
            query => args.queries.push(query.to_string()),
        }
        i += 1;
    }
    if args.queries.is_empty() { usage(); }
    args
}

/// Lexical and dense candidates, merged, re-ranked densely, then resolved to full documents.
fn build_pipeline(cfg: &PipelineConfig, args: &Args, embedder: Arc<dyn Embedder>, documents: &[Document]) -> anyhow::Result<Pipeline> {
    let on = cfg.content_fields.clone();
    let lexical = leaf(LexicalRetriever::new(&cfg.key_field, on.clone(), cfg.retriever_k)?);
    let dense = match &args.lance {
        Some(dir) => leaf(LanceRetriever::open(&dir.to_string_lossy(), "documents", &cfg.key_field, on.clone(), cfg.retriever_k, Arc::clone(&embedder))?),
        None => leaf(EncoderRetriever::new(&cfg.key_field, on.clone(), cfg.retriever_k, Arc::clone(&embedder))),
    };
    let candidates = if args.vote { vote([lexical, dense]).with_normalization(cfg.normalization) } else { union([lexical, dense]) };
    let ranker = leaf(EncoderRanker::new(&cfg.key_field, on, cfg.ranker_k, embedder));
    let pipeline = chain([candidates, ranker, mapping(&cfg.key_field, documents)?]);
    pipeline.validate()?;
    Ok(pipeline)
}

fn index(pipeline: &mut Pipeline, documents: &[Document]) -> anyhow::Result<()> {
    let pb = ProgressBar::new(documents.len() as u64);
    pb.set_style(ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents ({percent}%)")?.progress_chars("#>-"));
    for batch in documents.chunks(ADD_BATCH) {
        pipeline.add(batch)?;
        pb.inc(batch.len() as u64);
    }
    pb.finish_and_clear();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    let config = Config::load()?;
    let cfg = config.pipeline()?;
    let corpus = args
        .corpus
        .clone()
        .or_else(|| cfg.corpus.as_deref().map(expand_path))
        .unwrap_or_else(|| PathBuf::from("../dev_data/txt"));

    let text_field = cfg.content_fields.first().map_or("text", String::as_str);
    let documents = load_documents(&corpus, &cfg.key_field, text_field)?;
    tracing::info!(corpus = %corpus.display(), documents = documents.len(), "corpus loaded");

    let embedder: Arc<dyn Embedder> = Arc::from(default_embedder()?);
    let mut pipeline = build_pipeline(&cfg, &args, embedder, &documents)?;
    tracing::info!(pipeline = %pipeline, "pipeline built");
    index(&mut pipeline, &documents)?;

    let queries: Vec<Query> = args.queries.iter().map(|q| Query::from(q.as_str())).collect();
    let input = if queries.len() == 1 { QueryInput::from(queries[0].clone()) } else { QueryInput::from(queries) };
    let ranked = pipeline.run(input, args.k.or(cfg.final_k))?;
    println!("{}", serde_json::to_string_pretty(&ranked)?);
    Ok(())
}

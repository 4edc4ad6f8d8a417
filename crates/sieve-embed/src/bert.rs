//! XLM-RoBERTa sentence embeddings (BGE-M3 by default) on candle.
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;

use sieve_core::Embedder;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

pub const DEFAULT_MAX_LEN: usize = 256;

pub struct BertEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
}

impl BertEmbedder {
    /// Load `tokenizer.json`, `config.json` and `model.safetensors` (or `pytorch_model.bin`) from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?)?;
        let dim = config.hidden_size;

        let safetensors = model_dir.join("model.safetensors");
        let weights: HashMap<String, Tensor> = if safetensors.exists() {
            candle_core::safetensors::load(&safetensors, &device)?
        } else {
            candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?.into_iter().collect()
        };
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        tracing::info!(model_dir = %model_dir.display(), dim, "loaded embedding model");
        Ok(Self { model, tokenizer, device, dim, max_len: DEFAULT_MAX_LEN })
    }

    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self { self.max_len = max_len.max(1); self }
}

impl Embedder for BertEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(vec![]); }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = Tensor::zeros((texts.len(), self.max_len), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let out: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        tracing::debug!(texts = texts.len(), elapsed_ms = start.elapsed().as_millis(), "embedded batch");
        Ok(out)
    }
}

/// `SIEVE_MODEL_DIR`, then `models/bge-m3` relative to the working directory.
pub fn resolve_model_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SIEVE_MODEL_DIR") {
        let p = sieve_core::config::expand_path(&dir);
        if p.exists() { return Ok(p); }
        tracing::warn!(dir = %p.display(), "SIEVE_MODEL_DIR does not exist");
    }
    let local = Path::new("models/bge-m3");
    if local.exists() { return Ok(local.to_path_buf()); }
    Err(anyhow!("Could not locate embedding model directory (set SIEVE_MODEL_DIR)"))
}

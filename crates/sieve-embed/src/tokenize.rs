use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// XLM-RoBERTa pad token.
pub const PAD_ID: u32 = 1;

/// Tokenize `texts` into `[B, max_len]` id and mask tensors, truncating and padding each row.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let mut ids = Vec::with_capacity(texts.len() * max_len);
    let mut mask = Vec::with_capacity(texts.len() * max_len);
    for text in texts {
        let enc = tokenizer.encode(text.as_str(), true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        let (row_ids, row_mask) = pad_row(enc.get_ids(), enc.get_attention_mask(), max_len);
        ids.extend(row_ids);
        mask.extend(row_mask);
    }
    let input_ids = Tensor::from_iter(ids, device)?.reshape((texts.len(), max_len))?;
    let attention_mask = Tensor::from_iter(mask, device)?.reshape((texts.len(), max_len))?;
    Ok((input_ids, attention_mask))
}

pub fn pad_row(ids: &[u32], mask: &[u32], max_len: usize) -> (Vec<u32>, Vec<u32>) {
    let mut ids = ids[..ids.len().min(max_len)].to_vec();
    let mut mask = mask[..mask.len().min(max_len)].to_vec();
    ids.resize(max_len, PAD_ID);
    mask.resize(max_len, 0);
    (ids, mask)
}

use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// Tokenize a batch into fixed-length id and attention-mask tensors of
/// shape `[B, max_len]`. Longer inputs are truncated, shorter ones padded
/// with the BERT pad id (0) and a zeroed mask.
pub fn tokenize_batch(
    tokenizer: &Tokenizer,
    texts: &[String],
    max_len: usize,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let mut all_ids: Vec<u32> = Vec::with_capacity(texts.len() * max_len);
    let mut all_mask: Vec<u32> = Vec::with_capacity(texts.len() * max_len);
    for text in texts {
        let enc = tokenizer
            .encode(text.as_str(), true)
            .map_err(|e| anyhow!("tokenization failed: {}", e))?;
        let mut ids = enc.get_ids().to_vec();
        let mut mask = enc.get_attention_mask().to_vec();
        if ids.len() > max_len {
            ids.truncate(max_len);
            mask.truncate(max_len);
        }
        if ids.len() < max_len {
            let pad = max_len - ids.len();
            ids.extend(std::iter::repeat(0).take(pad));
            mask.extend(std::iter::repeat(0).take(pad));
        }
        all_ids.extend(ids);
        all_mask.extend(mask);
    }
    let shape = (texts.len(), max_len);
    let input_ids = Tensor::from_vec(all_ids, shape, device)?;
    let attention_mask = Tensor::from_vec(all_mask, shape, device)?;
    Ok((input_ids, attention_mask))
}

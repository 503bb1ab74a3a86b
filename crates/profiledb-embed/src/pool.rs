use anyhow::{ensure, Result};
use candle_core::{DType, Tensor};

/// Mean-pool `[B, T, H]` hidden states over unmasked tokens, then L2
/// normalize each row. Returns `[B, H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let dims = hidden.dims();
    ensure!(dims.len() == 3, "hidden shape must be [B, T, H]");
    let hidden_dim = dims[2];

    let mask = attention_mask
        .to_device(hidden.device())?
        .to_dtype(hidden.dtype())?;
    let mask3 = mask.unsqueeze(2)?;
    let mask3 = match mask3.broadcast_as(hidden.shape()) {
        Ok(m) => m,
        Err(_) => mask3.repeat((1, 1, hidden_dim))?,
    };
    let summed = (hidden * &mask3)?.sum(1)?;
    let lengths = mask.sum(1)?.unsqueeze(1)?.to_dtype(summed.dtype())?;
    let mut mean = summed.broadcast_div(&lengths)?;

    let eps_val = match hidden.dtype() {
        DType::F16 => 1e-6f32,
        _ => 1e-12f32,
    };
    let eps = Tensor::new(&[eps_val], hidden.device())?
        .to_dtype(hidden.dtype())?
        .unsqueeze(0)?;
    let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
    mean = mean.broadcast_div(&norm)?;
    Ok(mean)
}

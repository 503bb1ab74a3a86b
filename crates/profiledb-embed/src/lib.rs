//! Local sentence embedder.
//!
//! Wraps a MiniLM-class BERT checkpoint via candle. Output vectors are
//! masked-mean pooled over tokens and L2-normalized, dimension 384.
//! `APP_USE_FAKE_EMBEDDINGS=1` swaps in a deterministic hashed embedder so
//! tests and development never need model files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tracing::info;

use profiledb_core::error::{Error, Result};
use profiledb_core::traits::Embedder;
use profiledb_core::types::EMBEDDING_DIM;

mod device;
mod pool;
mod tokenize;

pub use device::select_device;
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_batch;

const MAX_LEN: usize = 256;

/// Sentence embedder backed by a local BERT checkpoint.
pub struct EmbeddingModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl EmbeddingModel {
    /// Load from the resolved default model directory.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&resolve_model_dir()?)
    }

    pub fn load_from(model_dir: &Path) -> anyhow::Result<Self> {
        let device = device::select_device();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            anyhow!(
                "failed to load tokenizer from {}: {}",
                tokenizer_path.display(),
                e
            )
        })?;
        let config_path = model_dir.join("config.json");
        let config: BertConfig = serde_json::from_str(
            &std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?,
        )?;
        let vb = load_weights(model_dir, &device)?;
        let model = BertModel::load(vb, &config)?;
        info!(model_dir = %model_dir.display(), "embedding model loaded");
        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn forward_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let (input_ids, attention_mask) =
            tokenize::tokenize_batch(&self.tokenizer, texts, MAX_LEN, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = pool::masked_mean_l2(&hidden, &attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_vec2()?;
        for row in &rows {
            if row.len() != EMBEDDING_DIM {
                return Err(anyhow!(
                    "model produced dimension {}, expected {}",
                    row.len(),
                    EMBEDDING_DIM
                ));
            }
        }
        Ok(rows)
    }
}

impl Embedder for EmbeddingModel {
    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn max_len(&self) -> usize {
        MAX_LEN
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.forward_batch(texts)
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> anyhow::Result<VarBuilder<'static>> {
    let safetensors_path = model_dir.join("model.safetensors");
    if safetensors_path.exists() {
        // Safety: the mmap'd file must not change while the model is live.
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[safetensors_path], DType::F32, device)? };
        return Ok(vb);
    }
    let weights_path = model_dir.join("pytorch_model.bin");
    let weights = candle_core::pickle::read_all(&weights_path)
        .with_context(|| format!("reading {}", weights_path.display()))?;
    let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
    Ok(VarBuilder::from_tensors(weights_map, DType::F32, device))
}

/// Deterministic hashed bag-of-words stand-in with the same shape contract
/// as the real model: fixed dimension, L2-normalized output. Used in tests
/// and offline development.
pub struct FakeEmbedder {
    dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;

        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        MAX_LEN
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Composition point for the pipeline: fake embedder when
/// `APP_USE_FAKE_EMBEDDINGS` is set, otherwise the real model from the
/// resolved model directory.
pub fn default_embedder() -> Result<Box<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if use_fake {
        info!("using fake embeddings");
        return Ok(Box::new(FakeEmbedder::new(EMBEDDING_DIM)));
    }
    let model_dir = resolve_model_dir().map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;
    let model =
        EmbeddingModel::load_from(&model_dir).map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;
    Ok(Box::new(model))
}

fn resolve_model_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") {
        let p = PathBuf::from(&dir);
        if p.exists() {
            return Ok(p);
        }
    }
    if let Ok(dir) = std::env::var("MODEL_DIR") {
        let p = PathBuf::from(&dir);
        if p.exists() {
            return Ok(p);
        }
    }
    for candidate in ["models/all-MiniLM-L6-v2", "../models/all-MiniLM-L6-v2"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(anyhow!("could not locate an embedding model directory"))
}

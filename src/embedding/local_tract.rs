//! Tract-based local vectorizer (fallback for musl and Intel Mac).
//!
//! Pure-Rust path: loads the ONNX export with tract-onnx, tokenizes with
//! the tokenizers crate, mean-pools the last hidden state over the
//! attention mask and L2-normalizes. Inference runs in `spawn_blocking`.
#![cfg_attr(
    all(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"),
    allow(dead_code)
)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tract_onnx::prelude::*;

use report_embedder_core::embedding::{normalize_l2, Vectorizer};

use super::{prepare_inputs, resolve_local_model, LOCAL_MAX_TOKENS};
use crate::config::EmbeddingConfig;

/// Model manifest: name -> (hub repo, onnx path in repo, tokenizer path in repo).
fn model_manifest(model_name: &str) -> Result<(&'static str, &'static str, &'static str)> {
    match model_name {
        "paraphrase-multilingual-mpnet-base-v2" => Ok((
            "sentence-transformers/paraphrase-multilingual-mpnet-base-v2",
            "onnx/model.onnx",
            "tokenizer.json",
        )),
        "all-minilm-l6-v2" => Ok((
            "sentence-transformers/all-MiniLM-L6-v2",
            "onnx/model.onnx",
            "tokenizer.json",
        )),
        _ => bail!(
            "Tract backend supports paraphrase-multilingual-mpnet-base-v2 and all-minilm-l6-v2. Requested: '{}'",
            model_name
        ),
    }
}

fn cache_dir() -> Result<PathBuf> {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(base)
        .join(".cache")
        .join("report-embedder")
        .join("models");
    std::fs::create_dir_all(&dir).map_err(|e| anyhow::anyhow!("Create cache dir: {}", e))?;
    Ok(dir)
}

fn download_to_cache(repo: &str, path: &str, cache_path: &Path) -> Result<()> {
    if cache_path.exists() {
        return Ok(());
    }
    let url = format!("https://huggingface.co/{}/resolve/main/{}", repo, path);
    tracing::info!(url = %url, "downloading model file");
    let bytes = reqwest::blocking::get(&url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(|e| anyhow::anyhow!("Download {}: {}", url, e))?;
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("Create cache parent: {}", e))?;
    }
    std::fs::write(cache_path, &bytes).map_err(|e| anyhow::anyhow!("Write cache: {}", e))?;
    Ok(())
}

struct LoadedModel {
    tokenizer: tokenizers::Tokenizer,
    plan: TypedRunnableModel<TypedModel>,
}

fn load(model_name: &str) -> Result<LoadedModel> {
    let (repo, onnx_rel, tokenizer_rel) = model_manifest(model_name)?;
    let model_dir = cache_dir()?.join(model_name);
    let onnx_path = model_dir.join(onnx_rel);
    let tokenizer_path = model_dir.join(tokenizer_rel);
    download_to_cache(repo, onnx_rel, &onnx_path)?;
    download_to_cache(repo, tokenizer_rel, &tokenizer_path)?;

    let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| anyhow::anyhow!("Load tokenizer: {}", e))?;
    let plan = tract_onnx::onnx()
        .model_for_path(onnx_path)
        .map_err(|e| anyhow::anyhow!("Load ONNX: {}", e))?
        .into_optimized()
        .map_err(|e| anyhow::anyhow!("Optimize: {}", e))?
        .into_runnable()
        .map_err(|e| anyhow::anyhow!("Build tract runnable: {}", e))?;

    Ok(LoadedModel { tokenizer, plan })
}

/// Local vectorizer backed by tract. The model loads on first use.
pub struct TractVectorizer {
    model_name: String,
    dims: usize,
    max_input_chars: usize,
    loaded: Arc<Mutex<Option<LoadedModel>>>,
}

impl TractVectorizer {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        model_manifest(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            max_input_chars: config.max_input_chars,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl Vectorizer for TractVectorizer {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn warm_up(&self) -> Result<()> {
        let slot = Arc::clone(&self.loaded);
        let model_name = self.model_name.clone();
        tokio::task::spawn_blocking(move || ensure_loaded(&slot, &model_name).map(|_| ())).await?
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = prepare_inputs(texts, self.max_input_chars);
        let slot = Arc::clone(&self.loaded);
        let model_name = self.model_name.clone();
        let dims = self.dims;

        tokio::task::spawn_blocking(move || {
            let guard = ensure_loaded(&slot, &model_name)?;
            let model = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("tract model not loaded"))?;
            run_batch(model, dims, &texts)
        })
        .await?
    }
}

fn ensure_loaded<'a>(
    slot: &'a Mutex<Option<LoadedModel>>,
    model_name: &str,
) -> Result<MutexGuard<'a, Option<LoadedModel>>> {
    let mut guard = slot
        .lock()
        .map_err(|_| anyhow::anyhow!("tract model lock poisoned"))?;
    if guard.is_none() {
        tracing::info!(model = %model_name, "loading tract embedding model");
        *guard = Some(load(model_name)?);
    }
    Ok(guard)
}

fn run_batch(model: &LoadedModel, dims: usize, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let encodings = texts
        .iter()
        .map(|s| {
            model
                .tokenizer
                .encode(s.as_str(), true)
                .map_err(|e| anyhow::anyhow!("Tokenize: {}", e))
        })
        .collect::<Result<Vec<_>>>()?;

    let max_len = encodings
        .iter()
        .map(|e| e.get_ids().len())
        .max()
        .unwrap_or(1)
        .clamp(1, LOCAL_MAX_TOKENS);

    let rows = encodings.len();
    let mut input_ids = vec![0i64; rows * max_len];
    let mut attention_mask = vec![0i64; rows * max_len];
    for (i, enc) in encodings.iter().enumerate() {
        for (j, &id) in enc.get_ids().iter().take(max_len).enumerate() {
            input_ids[i * max_len + j] = id as i64;
            attention_mask[i * max_len + j] = 1;
        }
    }

    let input_ids: Tensor = ndarray::Array2::from_shape_vec((rows, max_len), input_ids)
        .map_err(|e| anyhow::anyhow!("Input ids shape: {}", e))?
        .into();
    let mask: Tensor = ndarray::Array2::from_shape_vec((rows, max_len), attention_mask)
        .map_err(|e| anyhow::anyhow!("Attention mask shape: {}", e))?
        .into();
    let result = model.plan.run(tvec!(input_ids.into(), mask.into()))?;

    let output = result
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No output tensor"))?;
    let view = output
        .to_array_view::<f32>()
        .map_err(|e| anyhow::anyhow!("Output to array: {}", e))?;

    // [batch, seq, hidden] needs pooling; [batch, hidden] is already pooled
    let shape = view.shape().to_vec();
    let mut out = Vec::with_capacity(rows);
    match shape.len() {
        2 => {
            for i in 0..shape[0] {
                let row: Vec<f32> = view.slice(ndarray::s![i, ..]).iter().copied().collect();
                out.push(normalize_l2(row));
            }
        }
        3 => {
            for (i, enc) in encodings.iter().enumerate() {
                let valid = enc.get_ids().len().min(shape[1]).min(max_len);
                let mut sum = vec![0f32; dims];
                for j in 0..valid {
                    for (k, &v) in view.slice(ndarray::s![i, j, ..]).iter().take(dims).enumerate() {
                        sum[k] += v;
                    }
                }
                if valid > 0 {
                    for x in &mut sum {
                        *x /= valid as f32;
                    }
                }
                out.push(normalize_l2(sum));
            }
        }
        _ => bail!("Unexpected output shape: {:?}", shape),
    }

    Ok(out)
}

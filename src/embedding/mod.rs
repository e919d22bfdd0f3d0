//! Concrete [`Vectorizer`] backends.
//!
//! - **[`LocalVectorizer`]**: runs a sentence-transformer locally via
//!   fastembed (primary) or tract (musl/Intel Mac). The model is loaded by
//!   `warm_up` (or the first `embed` call) and kept by the vectorizer instance.
//! - **[`OpenAIVectorizer`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaVectorizer`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashVectorizer`]**: deterministic SHA-256 feature hashing. No model,
//!   no network; used by tests and offline runs.
//!
//! Every backend cuts inputs to `embedding.max_input_chars` characters
//! before encoding and returns L2-normalized vectors.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use report_embedder::config::EmbeddingConfig;
//! # use report_embedder::embedding::create_vectorizer;
//! let config = EmbeddingConfig {
//!     provider: "hash".to_string(),
//!     dims: Some(64),
//!     ..Default::default()
//! };
//! let vectorizer = create_vectorizer(&config).unwrap();
//! assert_eq!(vectorizer.dims(), 64);
//! ```
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama backends use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings-tract")]
mod local_tract;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use report_embedder_core::embedding::{normalize_l2, truncate_chars, Vectorizer};

use crate::config::EmbeddingConfig;

/// Default model for the `local` provider.
pub const DEFAULT_LOCAL_MODEL: &str = "paraphrase-multilingual-mpnet-base-v2";

/// Create the [`Vectorizer`] selected by `embedding.provider`.
///
/// | Config Value | Vectorizer |
/// |-------------|----------|
/// | `"disabled"` | error |
/// | `"local"` | [`LocalVectorizer`] (fastembed or tract, see features) |
/// | `"openai"` | [`OpenAIVectorizer`] |
/// | `"ollama"` | [`OllamaVectorizer`] |
/// | `"hash"` | [`HashVectorizer`] |
pub fn create_vectorizer(config: &EmbeddingConfig) -> Result<Arc<dyn Vectorizer>> {
    match config.provider.as_str() {
        "disabled" => bail!(
            "Embedding provider is disabled. Set [embedding] provider in the config to embed blocks."
        ),
        "openai" => Ok(Arc::new(OpenAIVectorizer::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaVectorizer::new(config)?)),
        "hash" => Ok(Arc::new(HashVectorizer::new(config)?)),
        #[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
        "local" => Ok(Arc::new(LocalVectorizer::new(config)?)),
        #[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
        "local" => bail!(
            "Local embedding provider requires one of: --features local-embeddings-fastembed, --features local-embeddings-tract"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn prepare_inputs(texts: &[String], max_chars: usize) -> Vec<String> {
    texts
        .iter()
        .map(|t| truncate_chars(t, max_chars).to_string())
        .collect()
}

// ============ Remote providers ============

async fn post_with_retry(
    client: &reqwest::Client,
    request: impl Fn() -> reqwest::RequestBuilder,
    max_retries: u32,
    service: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(service, attempt, delay_s = delay.as_secs(), "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        match client.execute(request().build()?).await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        service,
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error: {}", service, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", service)))
}

/// Embedding backend using the OpenAI API.
///
/// Calls `POST /v1/embeddings`. Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIVectorizer {
    model: String,
    dims: usize,
    api_key: String,
    max_input_chars: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIVectorizer {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_input_chars: config.max_input_chars,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Vectorizer for OpenAIVectorizer {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": prepare_inputs(texts, self.max_input_chars),
        });
        let json = post_with_retry(
            &self.client,
            || {
                self.client
                    .post("https://api.openai.com/v1/embeddings")
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&body)
            },
            self.max_retries,
            "OpenAI",
        )
        .await?;
        Ok(parse_openai_response(&json)?
            .into_iter()
            .map(normalize_l2)
            .collect())
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_to_vec(embedding)));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Embedding backend using a local Ollama instance (`POST /api/embed`).
pub struct OllamaVectorizer {
    model: String,
    dims: usize,
    url: String,
    max_input_chars: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaVectorizer {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            max_input_chars: config.max_input_chars,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Vectorizer for OllamaVectorizer {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": prepare_inputs(texts, self.max_input_chars),
        });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = post_with_retry(
            &self.client,
            || self.client.post(&endpoint).json(&body),
            self.max_retries,
            "Ollama",
        )
        .await?;
        Ok(parse_ollama_response(&json)?
            .into_iter()
            .map(normalize_l2)
            .collect())
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| json_to_vec(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn json_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(f64::NAN) as f32)
        .collect()
}

// ============ Hash Provider ============

/// Deterministic feature-hashing vectorizer.
///
/// Each whitespace token is hashed with SHA-256; the digest picks a bucket
/// and a sign. Texts sharing tokens therefore land near each other, which
/// is enough for pipeline tests and offline runs.
pub struct HashVectorizer {
    dims: usize,
    max_input_chars: usize,
}

impl HashVectorizer {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = match config.dims {
            Some(d) if d > 0 => d,
            _ => bail!("embedding.dims must be > 0 for the hash provider"),
        };
        Ok(Self {
            dims,
            max_input_chars: config.max_input_chars,
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dims];
        for token in text.split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        if v.iter().all(|x| *x == 0.0) {
            // No tokens (or they cancelled out): spread the whole-text digest
            let digest = Sha256::digest(text.as_bytes());
            for (i, f) in v.iter_mut().enumerate() {
                *f = (digest[i % 32] as f32 / 255.0) * 2.0 - 1.0;
            }
        }
        normalize_l2(v)
    }
}

#[async_trait]
impl Vectorizer for HashVectorizer {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| self.embed_one(truncate_chars(t, self.max_input_chars)))
            .collect())
    }
}

// ============ Local Provider (fastembed or tract) ============

#[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "paraphrase-multilingual-mpnet-base-v2" => 768,
        "paraphrase-multilingual-minilm-l12-v2" => 384,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        "all-minilm-l6-v2" => 384,
        _ => 768,
    });

    (model_name, dims)
}

/// Maximum token sequence fed to local models.
#[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
pub const LOCAL_MAX_TOKENS: usize = 512;

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "paraphrase-multilingual-mpnet-base-v2" => Ok(fastembed::EmbeddingModel::ParaphraseMLMpnetBaseV2),
        "paraphrase-multilingual-minilm-l12-v2" => Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             paraphrase-multilingual-mpnet-base-v2, paraphrase-multilingual-minilm-l12-v2, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large, all-minilm-l6-v2",
            other
        ),
    }
}

/// Local sentence-transformer inference.
///
/// Models are downloaded on first use and cached; afterwards embedding
/// runs offline. `TextEmbedding::embed` needs `&mut self`, so the loaded
/// model sits behind a `Mutex` and inference runs in `spawn_blocking`.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalVectorizer {
    model_name: String,
    dims: usize,
    max_input_chars: usize,
    model: ModelSlot,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalVectorizer {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        // Fail fast on unsupported names, before any download
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            max_input_chars: config.max_input_chars,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
type ModelSlot = Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>;

/// Load the model into `slot` unless already loaded. Blocking.
#[cfg(feature = "local-embeddings-fastembed")]
fn ensure_loaded(
    slot: &ModelSlot,
    model_name: &str,
) -> Result<std::sync::MutexGuard<'_, Option<fastembed::TextEmbedding>>> {
    let mut guard = slot
        .lock()
        .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;

    if guard.is_none() {
        tracing::info!(model = %model_name, "loading local embedding model");
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(config_to_fastembed_model(model_name)?)
                .with_max_length(LOCAL_MAX_TOKENS)
                .with_show_download_progress(false),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
        *guard = Some(model);
    }
    Ok(guard)
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Vectorizer for LocalVectorizer {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn warm_up(&self) -> Result<()> {
        let slot = Arc::clone(&self.model);
        let model_name = self.model_name.clone();
        tokio::task::spawn_blocking(move || ensure_loaded(&slot, &model_name).map(|_| ())).await?
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = prepare_inputs(texts, self.max_input_chars);
        let slot = Arc::clone(&self.model);
        let model_name = self.model_name.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = ensure_loaded(&slot, &model_name)?;
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?;
            let batch_size = texts.len().max(1);
            let embeddings = model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))?;

            Ok(embeddings.into_iter().map(normalize_l2).collect())
        })
        .await?
    }
}

#[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
pub use local_tract::TractVectorizer as LocalVectorizer;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use report_embedder_core::context::ContextPolicy;
use report_embedder_core::materializer::MaterializerConfig;
use report_embedder_core::runner::RunnerConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub materializer: MaterializerSection,
    #[serde(default)]
    pub runner: RunnerSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Inputs longer than this many characters are cut before embedding.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_input_chars: default_max_input_chars(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_input_chars() -> usize {
    2000
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaterializerSection {
    #[serde(default = "default_materializer_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
    #[serde(default = "default_true")]
    pub use_lookback_cache: bool,
    #[serde(default = "default_pause_every")]
    pub pause_every: usize,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

impl Default for MaterializerSection {
    fn default() -> Self {
        Self {
            batch_size: default_materializer_batch_size(),
            context_max_chars: default_context_max_chars(),
            use_lookback_cache: true,
            pause_every: default_pause_every(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

fn default_materializer_batch_size() -> usize {
    32
}
fn default_context_max_chars() -> usize {
    500
}
fn default_true() -> bool {
    true
}
fn default_pause_every() -> usize {
    10
}
fn default_batch_pause_ms() -> u64 {
    100
}

impl MaterializerSection {
    pub fn to_materializer_config(&self) -> MaterializerConfig {
        MaterializerConfig {
            batch_size: self.batch_size,
            policy: ContextPolicy::new(self.context_max_chars),
            use_lookback_cache: self.use_lookback_cache,
            pause_every: self.pause_every,
            batch_pause: Duration::from_millis(self.batch_pause_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerSection {
    #[serde(default = "default_runner_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            batch_size: default_runner_batch_size(),
            item_delay_ms: default_item_delay_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_runner_batch_size() -> usize {
    50
}
fn default_item_delay_ms() -> u64 {
    100
}
fn default_batch_delay_ms() -> u64 {
    3000
}
fn default_retry_delay_ms() -> u64 {
    5000
}

impl RunnerSection {
    pub fn to_runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            batch_size: self.batch_size,
            item_delay: Duration::from_millis(self.item_delay_ms),
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate materializer
    if config.materializer.batch_size == 0 {
        anyhow::bail!("materializer.batch_size must be > 0");
    }
    if config.materializer.context_max_chars == 0 {
        anyhow::bail!("materializer.context_max_chars must be > 0");
    }

    // Validate runner
    if config.runner.batch_size == 0 {
        anyhow::bail!("runner.batch_size must be > 0");
    }

    // Validate embedding
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" | "hash" => {
            if embedding.dims.is_none() || embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, openai, ollama, or hash.",
            other
        ),
    }
    if matches!(embedding.provider.as_str(), "openai" | "ollama") && embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            embedding.provider
        );
    }
    if embedding.is_enabled() && embedding.max_input_chars == 0 {
        anyhow::bail!("embedding.max_input_chars must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse("[db]\npath = \"./data/rembed.sqlite\"\n").unwrap();
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.materializer.batch_size, 32);
        assert_eq!(config.materializer.context_max_chars, 500);
        assert!(config.materializer.use_lookback_cache);
        assert_eq!(config.runner.batch_size, 50);
        assert_eq!(config.runner.batch_delay_ms, 3000);

        let runner = config.runner.to_runner_config();
        assert_eq!(runner.retry_delay, Duration::from_secs(5));
        let mat = config.materializer.to_materializer_config();
        assert_eq!(mat.policy.max_context_chars, 500);
        assert_eq!(mat.batch_pause, Duration::from_millis(100));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = parse("[db]\npath = \"x\"\n[materializer]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("materializer.batch_size"));
    }

    #[test]
    fn rejects_zero_context_budget() {
        let err = parse("[db]\npath = \"x\"\n[materializer]\ncontext_max_chars = 0\n").unwrap_err();
        assert!(err.to_string().contains("context_max_chars"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn remote_providers_need_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\ndims = 1536\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn local_provider_needs_nothing_else() {
        let config = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"local\"\n").unwrap();
        assert!(config.embedding.is_enabled());
        assert_eq!(config.embedding.max_input_chars, 2000);
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub guided: GuidedConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_min_fragment_len")]
    pub min_fragment_len: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            max_chunk_size: default_max_chunk_size(),
            min_fragment_len: default_min_fragment_len(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    crate::chunk::DEFAULT_MAX_CHUNK_SIZE
}
fn default_min_fragment_len() -> usize {
    crate::chunk::DEFAULT_MIN_FRAGMENT_LEN
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Result budget shared by the three tiers.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Limit for the broader literal fallback used when the tiers return
    /// nothing.
    #[serde(default = "default_fallback_limit")]
    pub fallback_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            limit: default_limit(),
            fallback_limit: default_fallback_limit(),
        }
    }
}

fn default_limit() -> usize {
    5
}
fn default_fallback_limit() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_embed_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: default_provider(),
            model: None,
            dims: None,
            timeout_secs: default_embed_timeout_secs(),
            max_retries: default_max_retries(),
            cache_ttl_secs: default_embed_cache_ttl_secs(),
            cache_capacity: default_embed_cache_capacity(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_cache_ttl_secs() -> u64 {
    60 * 60
}
fn default_embed_cache_capacity() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Most recent conversation turns included in the prompt.
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_completion_max_retries")]
    pub max_retries: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        CompletionConfig {
            provider: default_provider(),
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            history_messages: default_history_messages(),
            timeout_secs: default_completion_timeout_secs(),
            max_retries: default_completion_max_retries(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    800
}
fn default_history_messages() -> usize {
    7
}
fn default_completion_timeout_secs() -> u64 {
    60
}
fn default_completion_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuidedConfig {
    /// TTL for cached intent classifications, keyed by (message, tenant).
    #[serde(default = "default_intent_cache_ttl_secs")]
    pub intent_cache_ttl_secs: u64,
    /// Sessions older than this are removed by the periodic sweep.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Minimum classification confidence to act on a guide request.
    #[serde(default = "default_intent_confidence")]
    pub intent_confidence: f64,
    /// Confidence above which an unmatched title falls back to the first
    /// available document.
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f64,
}

impl Default for GuidedConfig {
    fn default() -> Self {
        GuidedConfig {
            intent_cache_ttl_secs: default_intent_cache_ttl_secs(),
            session_idle_secs: default_session_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            intent_confidence: default_intent_confidence(),
            fallback_confidence: default_fallback_confidence(),
        }
    }
}

fn default_intent_cache_ttl_secs() -> u64 {
    5 * 60
}
fn default_session_idle_secs() -> u64 {
    30 * 60
}
fn default_sweep_interval_secs() -> u64 {
    10 * 60
}
fn default_intent_confidence() -> f64 {
    0.7
}
fn default_fallback_confidence() -> f64 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8098".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chunk_size == 0 {
        anyhow::bail!("chunking.max_chunk_size must be > 0");
    }

    if config.retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.completion.is_enabled() && config.completion.model.is_none() {
        anyhow::bail!(
            "completion.model must be specified when provider is '{}'",
            config.completion.provider
        );
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    for (name, value) in [
        ("guided.intent_confidence", config.guided.intent_confidence),
        (
            "guided.fallback_confidence",
            config.guided.fallback_confidence,
        ),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 1.0]", name);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"data/procpilot.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_chunk_size, 4000);
        assert_eq!(config.retrieval.limit, 5);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.completion.history_messages, 7);
        assert_eq!(config.guided.session_idle_secs, 1800);
        assert_eq!(config.server.bind, "127.0.0.1:8098");
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let toml_str = r#"
            [db]
            path = "data/procpilot.sqlite"

            [embedding]
            provider = "openai"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.embedding.is_enabled());
        assert!(config.embedding.model.is_none());
    }
}

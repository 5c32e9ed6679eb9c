//! Configuration system for pdfqa.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/pdfqa/config.toml` and/or `.pdfqa/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{QaError, Result};

/// Top-level configuration for a question-answering session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

impl QaConfig {
    /// Reject parameter combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(QaError::invalid_configuration(
                "retrieval.top_k must be at least 1",
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(QaError::invalid_configuration(
                "embedding.batch_size must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Configuration for the text generation capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Provider name: "ollama" (default) or "openai" (any OpenAI-compatible endpoint).
    pub provider: String,
    /// Model identifier (e.g., "mistral", "llama3.1:8b", "gpt-4o-mini").
    pub model: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable name containing the API key (OpenAI-compatible only).
    pub api_key_env: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "mistral".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

/// Configuration for embedding providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "ollama" (default), "openai", "local".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Provider-specific model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Embedding dimensions (auto-detected from provider if 0).
    #[serde(default)]
    pub dimensions: usize,
    /// Number of passages sent per embedding request while building.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "ollama".into()
}

fn default_batch_size() -> usize {
    32
}

fn default_embedding_timeout() -> u64 {
    60
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            dimensions: 0,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

/// Chunking parameters, measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// An overlap that is not strictly smaller than the chunk size makes no progress.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(QaError::invalid_configuration(
                "chunk_size must be at least 1",
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(QaError::invalid_configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

/// Retrieval and citation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of passages retrieved per question.
    pub top_k: usize,
    /// Maximum characters of passage text kept in a citation.
    pub citation_excerpt_chars: usize,
    /// Number of citations the CLI prints under an answer.
    pub display_sources: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            citation_excerpt_chars: 100,
            display_sources: 2,
        }
    }
}

/// Retry policy applied inside the HTTP capability adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 disables retrying).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// On-disk index cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Whether built indexes are cached for reuse across sessions.
    pub cache_enabled: bool,
    /// Cache directory; defaults to the platform cache dir when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_dir: None,
        }
    }
}

impl IndexConfig {
    /// Resolve the directory the index cache lives in.
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone().or_else(|| {
            directories::ProjectDirs::from("dev", "pdfqa", "pdfqa")
                .map(|d| d.cache_dir().join("indexes"))
        })
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `PDFQA_`)
/// 3. Workspace-local config (`.pdfqa/config.toml`)
/// 4. User config (`~/.config/pdfqa/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&QaConfig>,
) -> std::result::Result<QaConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(QaConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "pdfqa", "pdfqa") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".pdfqa").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // PDFQA_GENERATOR__MODEL, PDFQA_CHUNKING__CHUNK_SIZE, etc.
    figment = figment.merge(Env::prefixed("PDFQA_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration from an explicit TOML file layered over the defaults.
pub fn load_config_file(path: &Path) -> std::result::Result<QaConfig, Box<figment::Error>> {
    Figment::from(Serialized::defaults(QaConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PDFQA_").split("__"))
        .extract()
        .map_err(Box::new)
}

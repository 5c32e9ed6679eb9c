//! Pluggable embedding providers.
//!
//! Provides a trait-based abstraction over embedding models, with implementations
//! for Ollama (default), any OpenAI-compatible embeddings endpoint, a local
//! hashed bag-of-words embedder for offline use, and a counting mock for tests.

use crate::config::{EmbeddingConfig, RetryConfig};
use crate::error::{QaError, Result, Stage};
use crate::http::{self, HttpFailure};
use crate::retry::with_retry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for a batch of texts, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Expected dimensionality, or 0 when only known after the first call.
    fn dimensions(&self) -> usize;

    /// Return the provider name.
    fn provider_name(&self) -> &str;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Whether the backing service answers and has the model.
    async fn is_available(&self) -> bool {
        true
    }

    /// Identity of the embedding space this embedder produces.
    fn fingerprint(&self) -> EmbedderFingerprint {
        EmbedderFingerprint {
            provider: self.provider_name().to_string(),
            model: self.model_name().to_string(),
            dimensions: self.dimensions(),
        }
    }
}

/// Identifies an embedding space. Vectors from different fingerprints are not comparable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderFingerprint {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

fn map_failure(failure: HttpFailure, timeout_secs: u64) -> QaError {
    match failure {
        HttpFailure::Unreachable(message) => QaError::EmbeddingUnavailable {
            stage: Stage::Embed,
            message,
        },
        HttpFailure::TimedOut => QaError::Timeout {
            stage: Stage::Embed,
            timeout_secs,
        },
        other => QaError::EmbeddingFailed {
            stage: Stage::Embed,
            message: other.to_string(),
        },
    }
}

fn single(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    match vectors.pop() {
        Some(v) if vectors.is_empty() => Ok(v),
        _ => Err(QaError::EmbeddingFailed {
            stage: Stage::Embed,
            message: "expected exactly one embedding in response".into(),
        }),
    }
}

/// Local hashed bag-of-words embedder (always available, no external dependencies).
///
/// Each lowercase alphanumeric term is hashed into a dimension and its term
/// frequency accumulated; the result is L2-normalised.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// djb2.
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }

    fn model_name(&self) -> &str {
        "hashed-bow"
    }
}

/// Ollama embedder (uses the local Ollama `/api/embed` endpoint).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    base_url: String,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OllamaEmbedder {
    pub fn new(model: Option<String>, base_url: Option<String>) -> Self {
        Self::with_options(model, base_url, 60, RetryConfig::default())
    }

    pub fn with_options(
        model: Option<String>,
        base_url: Option<String>,
        timeout_secs: u64,
        retry: RetryConfig,
    ) -> Self {
        let model = model.unwrap_or_else(|| "nomic-embed-text".into());
        let dims = match model.as_str() {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 0,
        };
        Self {
            client: http::build_client(timeout_secs),
            model,
            dims,
            base_url: http::trim_base(
                &base_url.unwrap_or_else(|| "http://localhost:11434".into()),
            ),
            timeout_secs,
            retry,
        }
    }

    async fn embed_api_call(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, HttpFailure> {
        let url = format!("{}/api/embed", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });
        let reply = http::post_json(&self.client, &url, &body, None).await?;
        let vectors: Option<Vec<Vec<f32>>> = reply["embeddings"]
            .as_array()
            .map(|rows| rows.iter().filter_map(http::parse_vector).collect());
        match vectors {
            Some(v) if v.len() == texts.len() => Ok(v),
            Some(v) => Err(HttpFailure::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                v.len()
            ))),
            None => Err(HttpFailure::Malformed("missing 'embeddings' array".into())),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        single(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retry(&self.retry, || self.embed_api_call(texts))
            .await
            .map_err(|e| map_failure(e, self.timeout_secs))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        ollama_has_model(&self.client, &self.base_url, &self.model).await
    }
}

/// Check that an Ollama server answers `/api/tags` and lists `model`.
///
/// Untagged names match any tag (`mistral` matches `mistral:latest`).
pub(crate) async fn ollama_has_model(
    client: &reqwest::Client,
    base_url: &str,
    model: &str,
) -> bool {
    let url = format!("{base_url}/api/tags");
    match http::get_json(client, &url).await {
        Ok(reply) => reply["models"].as_array().is_some_and(|models| {
            models.iter().filter_map(|m| m["name"].as_str()).any(|name| {
                name == model || (!model.contains(':') && name.split(':').next() == Some(model))
            })
        }),
        Err(e) => {
            tracing::debug!(error = %e, "Ollama availability probe failed");
            false
        }
    }
}

/// OpenAI API embedder (uses text-embedding-3-small by default).
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self::with_options(api_key, model, base_url, 60, RetryConfig::default())
    }

    pub fn with_options(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        timeout_secs: u64,
        retry: RetryConfig,
    ) -> Self {
        let model = model.unwrap_or_else(|| "text-embedding-3-small".into());
        let dims = match model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 0,
        };
        Self {
            client: http::build_client(timeout_secs),
            api_key,
            model,
            dims,
            base_url: http::trim_base(
                &base_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
            ),
            timeout_secs,
            retry,
        }
    }

    async fn embed_api_call(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, HttpFailure> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });
        let reply = http::post_json(&self.client, &url, &body, Some(&self.api_key)).await?;
        let data = reply["data"]
            .as_array()
            .ok_or_else(|| HttpFailure::Malformed("missing 'data' array".into()))?;

        // Rows carry their input position; order by it rather than trusting the reply order.
        let mut rows: Vec<(usize, Vec<f32>)> = data
            .iter()
            .enumerate()
            .filter_map(|(pos, row)| {
                let index = row["index"].as_u64().map(|i| i as usize).unwrap_or(pos);
                http::parse_vector(&row["embedding"]).map(|v| (index, v))
            })
            .collect();
        if rows.len() != texts.len() {
            return Err(HttpFailure::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                rows.len()
            )));
        }
        rows.sort_by_key(|(index, _)| *index);
        Ok(rows.into_iter().map(|(_, v)| v).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        single(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retry(&self.retry, || self.embed_api_call(texts))
            .await
            .map_err(|e| map_failure(e, self.timeout_secs))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Test double: deterministic local embeddings with call counting and fault injection.
pub struct MockEmbedder {
    inner: LocalEmbedder,
    calls: AtomicUsize,
    texts_embedded: AtomicUsize,
    fail_after: Option<usize>,
    delay: Option<Duration>,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: LocalEmbedder::new(dimensions),
            calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            fail_after: None,
            delay: None,
        }
    }

    /// Succeed for the first `n` texts, then report the service as unreachable.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `embed`/`embed_batch` invocations.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of individual texts embedded successfully.
    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(limit) = self.fail_after
            && self.texts_embedded.load(Ordering::SeqCst) >= limit
        {
            return Err(QaError::EmbeddingUnavailable {
                stage: Stage::Embed,
                message: "mock embedder offline".into(),
            });
        }
        self.texts_embedded.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.embed_sync(text))
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.embed_one(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }
}

/// Factory function to create an embedder based on configuration.
pub fn create_embedder(config: &EmbeddingConfig, retry: &RetryConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::with_options(
            config.model.clone(),
            config.base_url.clone(),
            config.timeout_secs,
            retry.clone(),
        ))),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
            if api_key.is_empty() {
                return Err(QaError::invalid_configuration(
                    "embedding provider 'openai' requires OPENAI_API_KEY",
                ));
            }
            Ok(Arc::new(OpenAiEmbedder::with_options(
                api_key,
                config.model.clone(),
                config.base_url.clone(),
                config.timeout_secs,
                retry.clone(),
            )))
        }
        "local" => {
            let dims = if config.dimensions > 0 {
                config.dimensions
            } else {
                256
            };
            Ok(Arc::new(LocalEmbedder::new(dims)))
        }
        other => Err(QaError::invalid_configuration(format!(
            "unknown embedding provider '{other}' (expected ollama, openai or local)"
        ))),
    }
}

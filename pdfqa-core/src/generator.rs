//! Text generation backends.
//!
//! A [`Generator`] turns one fully assembled prompt into one completion. The
//! pipeline never names a backend; it only sees `Arc<dyn Generator>`.

use crate::config::{GeneratorConfig, RetryConfig};
use crate::embeddings::ollama_has_model;
use crate::error::{QaError, Result, Stage};
use crate::http::{self, HttpFailure};
use crate::retry::with_retry;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// System instruction for plain chat mode.
pub const CHAT_SYSTEM_PROMPT: &str =
    "You are a friendly assistant. Answer the user's questions clearly and concisely.";

/// A text-completion capability.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete `prompt`. An empty completion is a valid result.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Complete `prompt` under a system instruction.
    ///
    /// Backends without a native system role fold it into the prompt.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.generate(&format!("{system}\n\n{prompt}")).await
    }

    fn model_name(&self) -> &str;

    fn provider_name(&self) -> &str;

    /// Whether the backing service answers and has the model.
    async fn is_available(&self) -> bool {
        true
    }
}

fn map_failure(failure: HttpFailure, timeout_secs: u64) -> QaError {
    match failure {
        HttpFailure::Unreachable(message) => QaError::GenerationUnavailable { message },
        HttpFailure::TimedOut => QaError::Timeout {
            stage: Stage::Generate,
            timeout_secs,
        },
        other => QaError::GenerationFailed {
            message: other.to_string(),
        },
    }
}

/// Ollama's native `/api/generate` endpoint, non-streaming.
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
    temperature: f32,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig, retry: &RetryConfig) -> Self {
        Self {
            client: http::build_client(config.timeout_secs),
            model: config.model.clone(),
            base_url: http::trim_base(
                config
                    .base_url
                    .as_deref()
                    .unwrap_or("http://localhost:11434"),
            ),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            retry: retry.clone(),
        }
    }

    async fn call(
        &self,
        system: Option<&str>,
        prompt: &str,
    ) -> std::result::Result<String, HttpFailure> {
        let url = format!("{}/api/generate", self.base_url);
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        let reply = http::post_json(&self.client, &url, &body, None).await?;
        reply["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| HttpFailure::Malformed("missing 'response' field".into()))
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_chars = prompt.chars().count(), "Generating");
        with_retry(&self.retry, || self.call(None, prompt))
            .await
            .map_err(|e| map_failure(e, self.timeout_secs))
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        with_retry(&self.retry, || self.call(Some(system), prompt))
            .await
            .map_err(|e| map_failure(e, self.timeout_secs))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        ollama_has_model(&self.client, &self.base_url, &self.model).await
    }
}

/// Any server speaking the OpenAI chat completions protocol
/// (OpenAI, vLLM, LM Studio, Ollama's `/v1`).
pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiCompatibleGenerator {
    /// Create a generator, reading the API key from `config.api_key_env`.
    ///
    /// Local servers do not need a key.
    pub fn new(config: &GeneratorConfig, retry: &RetryConfig) -> Result<Self> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("ollama".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                QaError::invalid_configuration(format!(
                    "generator provider 'openai' requires env var '{}'",
                    config.api_key_env
                ))
            })?;
        Ok(Self::new_with_key(config, retry, api_key))
    }

    pub fn new_with_key(config: &GeneratorConfig, retry: &RetryConfig, api_key: String) -> Self {
        Self {
            client: http::build_client(config.timeout_secs),
            base_url: http::trim_base(
                config
                    .base_url
                    .as_deref()
                    .unwrap_or("https://api.openai.com/v1"),
            ),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            retry: retry.clone(),
        }
    }

    async fn call(
        &self,
        system: Option<&str>,
        prompt: &str,
    ) -> std::result::Result<String, HttpFailure> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        let reply = http::post_json(&self.client, &url, &body, Some(&self.api_key)).await?;
        let choice = &reply["choices"][0]["message"];
        if choice.is_null() {
            return Err(HttpFailure::Malformed("missing 'choices[0].message'".into()));
        }
        // Some servers send `content: null` for an empty completion.
        Ok(choice["content"].as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl Generator for OpenAiCompatibleGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_chars = prompt.chars().count(), "Generating");
        with_retry(&self.retry, || self.call(None, prompt))
            .await
            .map_err(|e| map_failure(e, self.timeout_secs))
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        with_retry(&self.retry, || self.call(Some(system), prompt))
            .await
            .map_err(|e| map_failure(e, self.timeout_secs))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let request = self.client.get(&url).bearer_auth(&self.api_key).send().await;
        matches!(request, Ok(response) if response.status().is_success())
    }
}

/// Failure the mock generator should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Unavailable,
    Failed,
}

/// Test double for [`Generator`].
///
/// Returns queued replies in order, then a fixed fallback. Records every prompt.
pub struct MockGenerator {
    replies: Mutex<VecDeque<String>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    failure: Option<MockFailure>,
    delay: Option<Duration>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: "I'm a mock generator. No queued replies available.".to_string(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            failure: None,
            delay: None,
        }
    }

    /// A mock that always answers `text`.
    pub fn with_reply(text: &str) -> Self {
        Self {
            fallback: text.to_string(),
            ..Self::new()
        }
    }

    /// A mock whose every call fails.
    pub fn failing(failure: MockFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new()
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a reply for the next call.
    pub fn queue_reply(&self, text: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(text.into());
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure {
            Some(MockFailure::Unavailable) => {
                return Err(QaError::GenerationUnavailable {
                    message: "mock generator offline".into(),
                });
            }
            Some(MockFailure::Failed) => {
                return Err(QaError::GenerationFailed {
                    message: "mock generator refused".into(),
                });
            }
            None => {}
        }
        let queued = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        Ok(queued.unwrap_or_else(|| self.fallback.clone()))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

/// Factory function to create a generator based on configuration.
pub fn create_generator(
    config: &GeneratorConfig,
    retry: &RetryConfig,
) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config, retry))),
        "openai" => Ok(Arc::new(OpenAiCompatibleGenerator::new(config, retry)?)),
        other => Err(QaError::invalid_configuration(format!(
            "unknown generator provider '{other}' (expected ollama or openai)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::post;
    use serde_json::Value;
    use std::sync::atomic::AtomicU32;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config_for(base: String) -> GeneratorConfig {
        GeneratorConfig {
            base_url: Some(base),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_ollama_generate_sends_non_streaming_request() {
        let router = Router::new().route(
            "/api/generate",
            post(|axum::Json(body): axum::Json<Value>| async move {
                assert_eq!(body["stream"], json!(false));
                assert_eq!(body["model"], json!("mistral"));
                let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
                axum::Json(json!({ "response": format!("echo: {prompt}"), "done": true }))
            }),
        );
        let generator = OllamaGenerator::new(&config_for(serve(router).await), &fast_retry(0));
        let text = generator.generate("hi").await.unwrap();
        assert_eq!(text, "echo: hi");
    }

    #[tokio::test]
    async fn test_ollama_generate_passes_system_prompt() {
        let router = Router::new().route(
            "/api/generate",
            post(|axum::Json(body): axum::Json<Value>| async move {
                axum::Json(json!({ "response": body["system"].as_str().unwrap_or("none") }))
            }),
        );
        let generator = OllamaGenerator::new(&config_for(serve(router).await), &fast_retry(0));
        let text = generator
            .generate_with_system(CHAT_SYSTEM_PROMPT, "hello")
            .await
            .unwrap();
        assert_eq!(text, CHAT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_ollama_generate_missing_model_is_failed() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async {
                (
                    axum::http::StatusCode::NOT_FOUND,
                    r#"{"error":"model 'mistral' not found"}"#,
                )
            }),
        );
        let generator = OllamaGenerator::new(&config_for(serve(router).await), &fast_retry(2));
        match generator.generate("hi").await.unwrap_err() {
            QaError::GenerationFailed { message } => assert!(message.contains("not found")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ollama_generate_retries_server_errors() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/api/generate",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err((axum::http::StatusCode::SERVICE_UNAVAILABLE, "loading model"))
                    } else {
                        Ok(axum::Json(json!({ "response": "ready" })))
                    }
                }
            }),
        );
        let generator = OllamaGenerator::new(&config_for(serve(router).await), &fast_retry(2));
        assert_eq!(generator.generate("hi").await.unwrap(), "ready");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ollama_generate_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let generator = OllamaGenerator::new(&config_for(base), &fast_retry(0));
        assert!(matches!(
            generator.generate("hi").await,
            Err(QaError::GenerationUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_openai_compatible_generate() {
        let router = Router::new().route(
            "/chat/completions",
            post(|axum::Json(body): axum::Json<Value>| async move {
                assert_eq!(body["messages"][0]["role"], json!("user"));
                axum::Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "Blue." } }]
                }))
            }),
        );
        let generator = OpenAiCompatibleGenerator::new_with_key(
            &config_for(serve(router).await),
            &fast_retry(0),
            "key".into(),
        );
        assert_eq!(generator.generate("What color?").await.unwrap(), "Blue.");
    }

    #[tokio::test]
    async fn test_openai_compatible_null_content_is_empty() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                axum::Json(json!({ "choices": [{ "message": { "content": null } }] }))
            }),
        );
        let generator = OpenAiCompatibleGenerator::new_with_key(
            &config_for(serve(router).await),
            &fast_retry(0),
            "key".into(),
        );
        assert_eq!(generator.generate("q").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_openai_compatible_missing_choices_is_failed() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { axum::Json(json!({ "object": "error" })) }),
        );
        let generator = OpenAiCompatibleGenerator::new_with_key(
            &config_for(serve(router).await),
            &fast_retry(0),
            "key".into(),
        );
        assert!(matches!(
            generator.generate("q").await,
            Err(QaError::GenerationFailed { .. })
        ));
    }

    #[test]
    fn test_openai_compatible_local_needs_no_key() {
        let config = GeneratorConfig {
            provider: "openai".into(),
            base_url: Some("http://localhost:11434/v1".into()),
            api_key_env: "PDFQA_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        assert!(OpenAiCompatibleGenerator::new(&config, &RetryConfig::default()).is_ok());
    }

    #[test]
    fn test_openai_compatible_remote_requires_key() {
        let config = GeneratorConfig {
            provider: "openai".into(),
            api_key_env: "PDFQA_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiCompatibleGenerator::new(&config, &RetryConfig::default()),
            Err(QaError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_create_generator_unknown_provider() {
        let config = GeneratorConfig {
            provider: "telepathy".into(),
            ..Default::default()
        };
        assert!(create_generator(&config, &RetryConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_mock_generator_queue_then_fallback() {
        let generator = MockGenerator::with_reply("fallback");
        generator.queue_reply("first");
        assert_eq!(generator.generate("a").await.unwrap(), "first");
        assert_eq!(generator.generate("b").await.unwrap(), "fallback");
        assert_eq!(generator.call_count(), 2);
        assert_eq!(generator.prompts(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_generator_failure_modes() {
        let offline = MockGenerator::failing(MockFailure::Unavailable);
        assert!(matches!(
            offline.generate("q").await,
            Err(QaError::GenerationUnavailable { .. })
        ));
        let broken = MockGenerator::failing(MockFailure::Failed);
        assert!(matches!(
            broken.generate("q").await,
            Err(QaError::GenerationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_default_system_prompt_folds_into_prompt() {
        let generator = MockGenerator::new();
        generator.generate_with_system("be brief", "hello").await.unwrap();
        assert_eq!(generator.prompts(), vec!["be brief\n\nhello".to_string()]);
    }
}

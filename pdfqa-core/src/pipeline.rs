//! Retrieval-augmented question answering.
//!
//! [`RetrievalQa::ask`] runs embed -> search -> prompt -> generate strictly in
//! sequence. Each capability call is bounded by the caller's cancellation
//! token and a per-stage timeout. Nothing here retries; the adapters do.

use crate::config::QaConfig;
use crate::deadline::{bounded, from_secs};
use crate::error::{QaError, Result, Stage};
use crate::generator::Generator;
use crate::index::{ScoredPassage, VectorIndex};
use crate::prompt::PromptTemplate;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A retrieved passage backing an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub page: usize,
    pub chunk_index: usize,
    pub score: f32,
    /// Leading characters of the passage, ellipsised when cut.
    pub excerpt: String,
}

/// Generated text plus the passages it was grounded on, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Citation>,
}

/// Per-question knobs.
#[derive(Debug, Clone)]
pub struct QaOptions {
    pub top_k: usize,
    pub citation_excerpt_chars: usize,
    pub embed_timeout: Option<Duration>,
    pub generate_timeout: Option<Duration>,
}

impl Default for QaOptions {
    fn default() -> Self {
        Self::from_config(&QaConfig::default())
    }
}

impl QaOptions {
    pub fn from_config(config: &QaConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            citation_excerpt_chars: config.retrieval.citation_excerpt_chars,
            embed_timeout: from_secs(config.embedding.timeout_secs),
            generate_timeout: from_secs(config.generator.timeout_secs),
        }
    }
}

/// The question-answering orchestrator over one built index.
pub struct RetrievalQa {
    index: VectorIndex,
    generator: Arc<dyn Generator>,
    template: PromptTemplate,
    options: QaOptions,
}

impl RetrievalQa {
    pub fn new(index: VectorIndex, generator: Arc<dyn Generator>, options: QaOptions) -> Self {
        Self {
            index,
            generator,
            template: PromptTemplate::default(),
            options,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    pub fn options(&self) -> &QaOptions {
        &self.options
    }

    /// Answer `question` from the indexed document.
    ///
    /// Blank questions and an empty index are rejected before any capability
    /// is called.
    pub async fn ask(&self, question: &str, cancel: &CancellationToken) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QaError::invalid_input("question must not be empty"));
        }
        if self.index.is_empty() {
            return Err(QaError::EmptyIndex);
        }

        let started = Instant::now();
        let query = bounded(
            Stage::Embed,
            self.options.embed_timeout,
            cancel,
            self.index.embedder().embed(question),
        )
        .await
        .map_err(|e| e.at_stage(Stage::Embed))?;

        let hits = self.index.search(&query, self.options.top_k)?;
        debug!(
            top_k = self.options.top_k,
            hits = hits.len(),
            best = hits.first().map(|h| h.score).unwrap_or_default(),
            "Retrieved passages"
        );

        let passages: Vec<&str> = hits.iter().map(|h| h.passage.text.as_str()).collect();
        let prompt = self.template.render(&passages, question);

        let text = bounded(
            Stage::Generate,
            self.options.generate_timeout,
            cancel,
            self.generator.generate(&prompt),
        )
        .await?;

        info!(
            model = self.generator.model_name(),
            sources = hits.len(),
            answer_chars = text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Answered question"
        );

        Ok(Answer {
            text,
            sources: self.citations(hits),
        })
    }

    fn citations(&self, hits: Vec<ScoredPassage>) -> Vec<Citation> {
        hits.into_iter()
            .map(|hit| Citation {
                page: hit.passage.page,
                chunk_index: hit.passage.chunk_index,
                score: hit.score,
                excerpt: hit.passage.excerpt(self.options.citation_excerpt_chars),
            })
            .collect()
    }
}

//! A question-answering session over one document.
//!
//! Opening a session chunks the document and builds (or restores) its index.
//! The session then owns the index together with the embedder that built it
//! and the generator, so every question is embedded in the same space.

use crate::chunk::chunk_document;
use crate::config::QaConfig;
use crate::deadline::from_secs;
use crate::document::Document;
use crate::embeddings::{Embedder, create_embedder};
use crate::error::Result;
use crate::generator::{Generator, create_generator};
use crate::index::VectorIndex;
use crate::persistence::IndexCache;
use crate::pipeline::{Answer, QaOptions, RetrievalQa};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where the session's index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    Built,
    Cached,
}

pub struct Session {
    qa: RetrievalQa,
    source: String,
    document_hash: String,
    origin: IndexOrigin,
}

impl Session {
    /// Open a session with capabilities created from `config`.
    pub async fn from_config(
        document: &Document,
        config: &QaConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let embedder = create_embedder(&config.embedding, &config.retry)?;
        let generator = create_generator(&config.generator, &config.retry)?;
        Self::open(document, config, embedder, generator, cancel).await
    }

    /// Chunk `document` and index it with `embedder`.
    ///
    /// Configuration is validated before any capability is called. When the
    /// index cache is enabled a matching snapshot is reused instead of
    /// re-embedding, and a fresh build is saved for next time.
    pub async fn open(
        document: &Document,
        config: &QaConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let document_hash = document.content_hash();
        let cache = config
            .index
            .cache_enabled
            .then(|| config.index.resolved_cache_dir())
            .flatten()
            .map(IndexCache::new);

        let cached = match &cache {
            Some(cache) => cache.load(&document_hash, config.chunking, embedder.clone())?,
            None => None,
        };

        let (index, origin) = match cached {
            Some(index) => (index, IndexOrigin::Cached),
            None => {
                let passages = chunk_document(document, &config.chunking)?;
                let mut index = VectorIndex::new(embedder)
                    .with_batch_size(config.embedding.batch_size)
                    .with_timeout(from_secs(config.embedding.timeout_secs));
                index.build_with_cancel(passages, cancel).await?;

                if let Some(cache) = &cache
                    && let Err(e) = cache.save(&document_hash, config.chunking, &index)
                {
                    warn!(error = %e, "Failed to cache index; continuing without it");
                }
                (index, IndexOrigin::Built)
            }
        };

        info!(
            source = document.source(),
            passages = index.len(),
            origin = ?origin,
            embedder = index.embedder().model_name(),
            generator = generator.model_name(),
            "Session ready"
        );

        Ok(Self {
            qa: RetrievalQa::new(index, generator, QaOptions::from_config(config)),
            source: document.source().to_string(),
            document_hash,
            origin,
        })
    }

    /// Answer a question about the document.
    pub async fn ask(&self, question: &str, cancel: &CancellationToken) -> Result<Answer> {
        self.qa.ask(question, cancel).await
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn document_hash(&self) -> &str {
        &self.document_hash
    }

    pub fn origin(&self) -> IndexOrigin {
        self.origin
    }

    pub fn passage_count(&self) -> usize {
        self.qa.index().len()
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        self.qa.generator()
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        self.qa.index().embedder()
    }
}

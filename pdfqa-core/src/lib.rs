//! # pdfqa Core
//!
//! Retrieval-augmented question answering over a single document.
//! Provides document loading, chunking, pluggable embedders and generators,
//! an in-memory vector index with an on-disk cache, and the question-answering
//! orchestrator tied together by [`Session`].

pub mod chunk;
pub mod config;
mod deadline;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod generator;
mod http;
pub mod index;
pub mod persistence;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod session;

// Re-export commonly used types at the crate root.
pub use chunk::{Passage, chunk_document, chunk_text};
pub use config::{
    ChunkingConfig, EmbeddingConfig, GeneratorConfig, IndexConfig, QaConfig, RetrievalConfig,
    RetryConfig, load_config, load_config_file,
};
pub use document::{Document, discover_documents};
pub use embeddings::{
    Embedder, EmbedderFingerprint, LocalEmbedder, MockEmbedder, OllamaEmbedder, OpenAiEmbedder,
    create_embedder,
};
pub use error::{DocumentError, QaError, Result, Stage};
pub use generator::{
    CHAT_SYSTEM_PROMPT, Generator, MockFailure, MockGenerator, OllamaGenerator,
    OpenAiCompatibleGenerator, create_generator,
};
pub use index::{BuildStats, IndexEntry, ScoredPassage, VectorIndex, cosine_similarity};
pub use persistence::IndexCache;
pub use pipeline::{Answer, Citation, QaOptions, RetrievalQa};
pub use prompt::PromptTemplate;
pub use session::{IndexOrigin, Session};
pub use tokio_util::sync::CancellationToken;

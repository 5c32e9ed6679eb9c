//! Error types for the pdfqa core library.
//!
//! Uses `thiserror` for a single public error enum whose variants map onto the
//! failure kinds callers need to tell apart: bad configuration, bad input,
//! unreachable capabilities, failed capabilities, and an index that was never
//! built. External-capability variants carry the pipeline [`Stage`] that failed.

use std::fmt;
use std::path::PathBuf;

/// Pipeline stage in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Embedding passages while building the index.
    Build,
    /// Embedding the question.
    Embed,
    /// Nearest-neighbour lookup.
    Search,
    /// Text generation.
    Generate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Build => "build",
            Stage::Embed => "embed",
            Stage::Search => "search",
            Stage::Generate => "generate",
        };
        f.write_str(name)
    }
}

/// Top-level error type for the question-answering pipeline.
#[derive(Debug, thiserror::Error)]
pub enum QaError {
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Embedding service unavailable during {stage}: {message}")]
    EmbeddingUnavailable { stage: Stage, message: String },

    #[error("Embedding failed during {stage}: {message}")]
    EmbeddingFailed { stage: Stage, message: String },

    #[error("Generation service unavailable: {message}")]
    GenerationUnavailable { message: String },

    #[error("Generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("Vector index is empty; build it from a document before searching")]
    EmptyIndex,

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{stage} timed out after {timeout_secs}s")]
    Timeout { stage: Stage, timeout_secs: u64 },

    #[error("{stage} was cancelled")]
    Cancelled { stage: Stage },

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QaError {
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// The pipeline stage this error belongs to, if it came from one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::EmbeddingUnavailable { stage, .. }
            | Self::EmbeddingFailed { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Cancelled { stage } => Some(*stage),
            Self::GenerationUnavailable { .. } | Self::GenerationFailed { .. } => {
                Some(Stage::Generate)
            }
            Self::EmptyIndex | Self::DimensionMismatch { .. } => Some(Stage::Search),
            _ => None,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    ///
    /// Unreachable services and timeouts are transient; everything else
    /// (bad input, bad config, empty index, explicit failures) is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable { .. }
                | Self::GenerationUnavailable { .. }
                | Self::Timeout { .. }
        )
    }

    /// Re-tag an embedding error with a different stage.
    ///
    /// Embedders report [`Stage::Embed`]; the index build re-labels them.
    pub(crate) fn at_stage(self, stage: Stage) -> Self {
        match self {
            Self::EmbeddingUnavailable { message, .. } => {
                Self::EmbeddingUnavailable { stage, message }
            }
            Self::EmbeddingFailed { message, .. } => Self::EmbeddingFailed { stage, message },
            Self::Timeout { timeout_secs, .. } => Self::Timeout {
                stage,
                timeout_secs,
            },
            Self::Cancelled { .. } => Self::Cancelled { stage },
            other => other,
        }
    }
}

/// Errors from loading a document off disk.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Unsupported document type: {path}")]
    UnsupportedType { path: PathBuf },

    #[error("Failed to extract text from {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    #[error("Document contains no extractable text: {path}")]
    NoText { path: PathBuf },
}

/// A type alias for results using [`QaError`].
pub type Result<T> = std::result::Result<T, QaError>;

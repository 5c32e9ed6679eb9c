//! Document chunking.
//!
//! Pages are cut into fixed-size character windows. Consecutive windows on the
//! same page overlap by exactly `chunk_overlap` characters, so dropping that
//! prefix from every window after the first reproduces the page verbatim.

use crate::config::ChunkingConfig;
use crate::document::Document;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A bounded span of document text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    /// 1-based page the passage was cut from.
    pub page: usize,
    /// 0-based position of the passage across the whole document.
    pub chunk_index: usize,
    /// Character offset of the passage within its page.
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Passage {
    /// The first `max_chars` characters, with an ellipsis when cut short.
    pub fn excerpt(&self, max_chars: usize) -> String {
        match self.text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => format!("{}...", &self.text[..byte_idx]),
            None => self.text.clone(),
        }
    }

    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// Split every page of `document` into overlapping passages.
///
/// Fails with `InvalidConfiguration` when the overlap is not smaller than the
/// chunk size.
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Result<Vec<Passage>> {
    config.validate()?;

    let mut passages = Vec::new();
    for (page_idx, page) in document.pages().iter().enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        chunk_page(page, page_idx + 1, config, &mut passages);
    }

    tracing::debug!(
        source = document.source(),
        pages = document.page_count(),
        passages = passages.len(),
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        "Chunked document"
    );
    Ok(passages)
}

/// Chunk a single string as page 1. Convenience for callers without a file.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<Passage>> {
    chunk_document(
        &Document::from_pages("inline", vec![text.to_string()]),
        config,
    )
}

fn chunk_page(text: &str, page: usize, config: &ChunkingConfig, out: &mut Vec<Passage>) {
    let chars: Vec<char> = text.chars().collect();
    let step = config.chunk_size - config.chunk_overlap;
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        out.push(Passage {
            text: chars[start..end].iter().collect(),
            page,
            chunk_index: out.len(),
            start_offset: start,
            end_offset: end,
        });
        if end == chars.len() {
            break;
        }
        start += step;
    }
}

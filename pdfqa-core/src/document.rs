//! Document loading.
//!
//! A [`Document`] is the ordered list of page texts pulled out of a file.
//! PDFs are extracted page by page with `pdf-extract`; plain-text formats
//! treat form feeds as page breaks.

use crate::error::{DocumentError, QaError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "text"];

/// An immutable, page-ordered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    source: String,
    pages: Vec<String>,
}

impl Document {
    /// Build a document from already-extracted page texts.
    pub fn from_pages(source: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            source: source.into(),
            pages,
        }
    }

    /// Load a PDF or plain-text file from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(DocumentError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let pages = if ext == "pdf" {
            extract_pdf_pages(path).await?
        } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            let content = tokio::fs::read_to_string(path).await?;
            content.split('\u{000C}').map(str::to_string).collect()
        } else {
            return Err(DocumentError::UnsupportedType {
                path: path.to_path_buf(),
            }
            .into());
        };

        if pages.iter().all(|p| p.trim().is_empty()) {
            return Err(DocumentError::NoText {
                path: path.to_path_buf(),
            }
            .into());
        }

        let doc = Self::from_pages(path.display().to_string(), pages);
        info!(source = %doc.source, pages = doc.page_count(), "Loaded document");
        Ok(doc)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Total characters across all pages.
    pub fn char_count(&self) -> usize {
        self.pages.iter().map(|p| p.chars().count()).sum()
    }

    /// SHA-256 over the page texts, independent of where the file lives.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for page in &self.pages {
            hasher.update((page.len() as u64).to_le_bytes());
            hasher.update(page.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

async fn extract_pdf_pages(path: &Path) -> Result<Vec<String>> {
    let bytes = tokio::fs::read(path).await?;
    let owned = path.to_path_buf();
    debug!(path = %owned.display(), bytes = bytes.len(), "Extracting PDF text");

    // Extraction is CPU-bound and the parser can panic on malformed files.
    let extracted =
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem_by_pages(&bytes))
            .await
            .map_err(|e| DocumentError::Extraction {
                path: owned.clone(),
                message: format!("extractor aborted: {e}"),
            })?;

    extracted.map_err(|e| {
        QaError::from(DocumentError::Extraction {
            path: owned,
            message: e.to_string(),
        })
    })
}

/// List candidate PDF documents in a directory, sorted by file name.
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    found.sort();
    Ok(found)
}

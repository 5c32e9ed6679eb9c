//! Choosing which document to open.

use anyhow::{Context, bail};
use dialoguer::Select;
use std::path::{Path, PathBuf};

/// Use `explicit` if given; otherwise pick among the PDFs in `workspace`.
///
/// A single candidate is used directly. Several prompt the user.
pub fn resolve_document(explicit: Option<&Path>, workspace: &Path) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let candidates = pdfqa_core::discover_documents(workspace)
        .with_context(|| format!("Failed to list {}", workspace.display()))?;
    match pick(&candidates) {
        Pick::One(path) => Ok(path),
        Pick::None => bail!(
            "No PDF files found in {}. Pass a document path, e.g. `pdfqa paper.pdf`.",
            workspace.display()
        ),
        Pick::Ask => {
            let names: Vec<String> = candidates.iter().map(|p| display_name(p)).collect();
            let selection = Select::new()
                .with_prompt("Select a document")
                .items(&names)
                .default(0)
                .interact()?;
            Ok(candidates[selection].clone())
        }
    }
}

#[derive(Debug, PartialEq)]
enum Pick {
    None,
    One(PathBuf),
    Ask,
}

fn pick(candidates: &[PathBuf]) -> Pick {
    match candidates {
        [] => Pick::None,
        [only] => Pick::One(only.clone()),
        _ => Pick::Ask,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

//! pdfqa CLI: ask a local language model questions about a PDF.
//!
//! Without a subcommand, indexes a document and starts the question loop.

mod commands;
mod repl;
mod select;

use clap::Parser;
use pdfqa_core::{CancellationToken, Document, QaConfig, Session};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// pdfqa: question answering over your PDFs with a local model
#[derive(Parser, Debug)]
#[command(name = "pdfqa", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Document to index (discovers *.pdf in the workspace if omitted)
    document: Option<PathBuf>,

    /// Generation model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Embedding model to use
    #[arg(long)]
    embed_model: Option<String>,

    /// Number of passages retrieved per question
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Always rebuild the index instead of reusing a cached one
    #[arg(long)]
    no_cache: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Chat with the model directly, without a document
    Chat,
    /// Check that the configured models are reachable
    Check,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,pdfqa_core=debug",
        _ => "debug",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "pdfqa", "pdfqa")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "pdfqa.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = resolve_config(&cli, &workspace)?;
    tracing::debug!(
        workspace = %workspace.display(),
        generator = %config.generator.model,
        embedder = %config.embedding.provider,
        "Resolved configuration"
    );

    if let Some(command) = cli.command {
        return commands::handle_command(command, config, &workspace).await;
    }

    let path = select::resolve_document(cli.document.as_deref(), &workspace)?;
    let document = Document::load(&path).await?;

    if !cli.quiet {
        println!(
            "\x1b[90m  Indexing {} ({} pages) with {}...\x1b[0m",
            path.display(),
            document.page_count(),
            config.embedding.model.as_deref().unwrap_or(&config.embedding.provider)
        );
    }

    let cancel = CancellationToken::new();
    let session = {
        let _interrupt = repl::cancel_on_interrupt(&cancel);
        Session::from_config(&document, &config, &cancel).await
    };
    let session = match session {
        Ok(session) => {
            tracing::info!(
                document = %path.display(),
                passages = session.passage_count(),
                origin = ?session.origin(),
                "Session ready"
            );
            session
        }
        Err(e) => {
            repl::print_error(&e, &config);
            return Err(e.into());
        }
    };

    repl::run_interactive(&session, &config).await
}

/// Layer CLI flags over the loaded configuration and validate the result.
fn resolve_config(cli: &Cli, workspace: &Path) -> anyhow::Result<QaConfig> {
    let mut config = match &cli.config {
        Some(path) => pdfqa_core::load_config_file(path),
        None => pdfqa_core::load_config(Some(workspace), None),
    }
    .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    if let Some(model) = &cli.model {
        config.generator.model = model.clone();
    }
    if let Some(model) = &cli.embed_model {
        config.embedding.model = Some(model.clone());
    }
    if let Some(top_k) = cli.top_k {
        config.retrieval.top_k = top_k;
    }
    if cli.no_cache {
        config.index.cache_enabled = false;
    }

    config.validate()?;
    Ok(config)
}

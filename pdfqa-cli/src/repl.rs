//! Interactive question loop.

use pdfqa_core::{
    Answer, CHAT_SYSTEM_PROMPT, CancellationToken, Generator, IndexOrigin, QaConfig, QaError,
    Session, Stage,
};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::task::JoinHandle;

const WRAP_WIDTH: usize = 100;

/// Cancels a token on Ctrl-C for as long as it is alive.
pub(crate) struct InterruptGuard(JoinHandle<()>);

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Cancel `token` if the user presses Ctrl-C before the guard is dropped.
pub(crate) fn cancel_on_interrupt(token: &CancellationToken) -> InterruptGuard {
    let token = token.clone();
    InterruptGuard(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    }))
}

/// What a line of user input asks for.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Input<'a> {
    Exit,
    Skip,
    Text(&'a str),
}

pub(crate) fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        Input::Skip
    } else if ["exit", "quit", "bye"]
        .iter()
        .any(|word| line.eq_ignore_ascii_case(word))
    {
        Input::Exit
    } else {
        Input::Text(line)
    }
}

/// Read the next line, or `None` on EOF or Ctrl-C at the prompt.
async fn read_line(
    lines: &mut Lines<BufReader<Stdin>>,
    prompt: &str,
) -> anyhow::Result<Option<String>> {
    print!("\x1b[1;34m{prompt} \x1b[0m");
    io::stdout().flush()?;
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        _ = tokio::signal::ctrl_c() => {
            println!();
            Ok(None)
        }
    }
}

/// Ask questions about the session's document until the user leaves.
pub async fn run_interactive(session: &Session, config: &QaConfig) -> anyhow::Result<()> {
    println!(
        "\n\x1b[1;32m  pdfqa\x1b[0m | Document: {} | Passages: {}{} | Model: {}",
        session.source(),
        session.passage_count(),
        if session.origin() == IndexOrigin::Cached {
            " (cached)"
        } else {
            ""
        },
        session.generator().model_name(),
    );
    println!("  Ask a question about the document. Type exit, quit or bye to leave.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = read_line(&mut lines, "Question:").await? {
        let question = match classify(&line) {
            Input::Exit => break,
            Input::Skip => continue,
            Input::Text(q) => q,
        };

        let cancel = CancellationToken::new();
        let result = {
            let _interrupt = cancel_on_interrupt(&cancel);
            print!("\x1b[90m  thinking...\x1b[0m");
            io::stdout().flush()?;
            session.ask(question, &cancel).await
        };
        print!("\r\x1b[2K");

        match result {
            Ok(answer) => print_answer(&answer, config.retrieval.display_sources),
            Err(QaError::Cancelled { .. }) => println!("\x1b[33m  Cancelled.\x1b[0m\n"),
            Err(e) => print_error(&e, config),
        }
    }

    println!("Goodbye!");
    Ok(())
}

/// Talk to the generator directly, without retrieval.
pub async fn run_chat(generator: &dyn Generator, config: &QaConfig) -> anyhow::Result<()> {
    println!(
        "\n\x1b[1;32m  pdfqa chat\x1b[0m | Model: {}",
        generator.model_name()
    );
    println!("  Type exit, quit or bye to leave.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = read_line(&mut lines, "You:").await? {
        let message = match classify(&line) {
            Input::Exit => break,
            Input::Skip => continue,
            Input::Text(m) => m,
        };

        let cancel = CancellationToken::new();
        let result = {
            let _interrupt = cancel_on_interrupt(&cancel);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(QaError::Cancelled { stage: Stage::Generate }),
                reply = generator.generate_with_system(CHAT_SYSTEM_PROMPT, message) => reply,
            }
        };

        match result {
            Ok(reply) => println!("\n\x1b[32mAssistant:\x1b[0m\n{}\n", wrap(&reply)),
            Err(QaError::Cancelled { .. }) => println!("\x1b[33m  Cancelled.\x1b[0m\n"),
            Err(e) => print_error(&e, config),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn wrap(text: &str) -> String {
    let options = textwrap::Options::new(WRAP_WIDTH)
        .initial_indent("  ")
        .subsequent_indent("  ");
    textwrap::fill(text, options)
}

fn print_answer(answer: &Answer, display_sources: usize) {
    let text = if answer.text.trim().is_empty() {
        "(the model returned an empty answer)"
    } else {
        answer.text.trim()
    };
    println!("\n\x1b[32mAnswer:\x1b[0m\n{}\n", wrap(text));
    let sources = format_sources(answer, display_sources);
    if !sources.is_empty() {
        println!("\x1b[90mSources:\x1b[0m");
        for line in sources {
            println!("  \x1b[90m{line}\x1b[0m");
        }
        println!();
    }
}

/// `Page N: excerpt` lines for the best `limit` citations.
pub(crate) fn format_sources(answer: &Answer, limit: usize) -> Vec<String> {
    answer
        .sources
        .iter()
        .take(limit)
        .map(|c| format!("Page {}: {}", c.page, c.excerpt.replace('\n', " ")))
        .collect()
}

pub(crate) fn print_error(error: &QaError, config: &QaConfig) {
    eprintln!("\x1b[31m  Error:\x1b[0m {error}");
    if let Some(hint) = hint(error, config) {
        eprintln!("  \x1b[90mHint:\x1b[0m {hint}");
    }
    eprintln!();
}

/// Remediation advice for errors a user can fix themselves.
pub(crate) fn hint(error: &QaError, config: &QaConfig) -> Option<String> {
    let ollama_embeds = config.embedding.provider == "ollama";
    let ollama_generates = config.generator.provider == "ollama";
    let embed_model = config.embedding.model.as_deref().unwrap_or("nomic-embed-text");
    match error {
        QaError::EmbeddingUnavailable { .. } if ollama_embeds => {
            Some("is Ollama running? Start it with `ollama serve`.".into())
        }
        QaError::GenerationUnavailable { .. } if ollama_generates => {
            Some("is Ollama running? Start it with `ollama serve`.".into())
        }
        QaError::EmbeddingFailed { message, .. } if ollama_embeds && message.contains("404") => {
            Some(format!("pull the embedding model with `ollama pull {embed_model}`."))
        }
        QaError::GenerationFailed { message }
            if ollama_generates && message.contains("not found") =>
        {
            Some(format!(
                "pull the model with `ollama pull {}`.",
                config.generator.model
            ))
        }
        QaError::Timeout { stage, .. } => Some(format!(
            "the {stage} step is slow; raise the timeout in .pdfqa/config.toml or try a smaller model."
        )),
        QaError::InvalidInput { .. } => Some("type a question about the document.".into()),
        _ => None,
    }
}

//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use pdfqa_core::{QaConfig, create_embedder, create_generator};
use std::path::Path;

pub async fn handle_command(
    command: Commands,
    config: QaConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Chat => {
            let generator = create_generator(&config.generator, &config.retry)?;
            crate::repl::run_chat(generator.as_ref(), &config).await
        }
        Commands::Check => handle_check(&config).await,
        Commands::Config { action } => handle_config(action, &config, workspace),
    }
}

/// Outcome of probing one capability.
#[derive(Debug, PartialEq)]
struct Probe {
    label: &'static str,
    provider: String,
    model: String,
    available: bool,
}

impl Probe {
    fn line(&self) -> String {
        let mark = if self.available {
            "\x1b[32m✓\x1b[0m"
        } else {
            "\x1b[31m✗\x1b[0m"
        };
        format!(
            "{mark} {:<10} {} ({})",
            self.label, self.model, self.provider
        )
    }

    /// What to do about an unavailable Ollama model.
    fn remedy(&self) -> Option<String> {
        (!self.available && self.provider == "ollama")
            .then(|| format!("ollama pull {}", self.model))
    }
}

async fn handle_check(config: &QaConfig) -> anyhow::Result<()> {
    let generator = create_generator(&config.generator, &config.retry)?;
    let embedder = create_embedder(&config.embedding, &config.retry)?;

    let (generator_ok, embedder_ok) =
        tokio::join!(generator.is_available(), embedder.is_available());
    let probes = [
        Probe {
            label: "generator",
            provider: generator.provider_name().to_string(),
            model: generator.model_name().to_string(),
            available: generator_ok,
        },
        Probe {
            label: "embedder",
            provider: embedder.provider_name().to_string(),
            model: embedder.model_name().to_string(),
            available: embedder_ok,
        },
    ];

    for probe in &probes {
        println!("  {}", probe.line());
    }

    let remedies: Vec<String> = probes.iter().filter_map(Probe::remedy).collect();
    if probes.iter().all(|p| p.available) {
        println!("\n  Ready.");
        return Ok(());
    }
    if !remedies.is_empty() {
        println!("\n  Make sure Ollama is running (`ollama serve`), then:");
        for remedy in remedies {
            println!("    {remedy}");
        }
    }
    anyhow::bail!("one or more models are unavailable")
}

fn handle_config(action: ConfigAction, config: &QaConfig, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".pdfqa");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&QaConfig::default())?;
            std::fs::write(&config_path, toml_str)?;
            println!("Created configuration file at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}

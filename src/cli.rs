//! CLI interface for knowledge-agent

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{self, OllamaClient, SaveSchedule};
use crate::config::{self, Config};
use crate::learning::{Interaction, KnowledgeEngine};
use crate::logging;
use crate::memory::{self, KnowledgeStore};
use crate::speech::Transcriber;

#[derive(Parser)]
#[command(name = "knowledge-agent")]
#[command(about = "Personal conversational agent that learns from your feedback", long_about = None)]
#[command(version)]
struct Cli {
    /// Use this configuration file instead of the default location
    #[arg(long, global = true, env = "KNOWLEDGE_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session (default when no command given)
    Chat,
    /// Show feedback statistics
    Stats,
    /// Show the most recent interactions
    Recent {
        /// Number of interactions to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },
    /// List learned patterns
    Patterns,
    /// Rate a previous interaction
    Feedback {
        /// Interaction ID (as printed after each chat turn)
        id: String,
        /// Rating, normally 1-5
        #[arg(allow_negative_numbers = true)]
        rating: i32,
        /// Optional comment
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Export the knowledge base as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace the knowledge base with an exported JSON document
    Import {
        /// File produced by `export`
        file: PathBuf,
    },
    /// Write a backup of the stored knowledge base now
    Backup,
    /// Transcribe an audio file with the configured speech backend
    Transcribe {
        /// Audio file (wav, mp3, ...)
        file: PathBuf,
    },
    /// Show or reset configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}

/// Engine plus the store it was loaded from
struct Runtime {
    config: Config,
    engine: Arc<KnowledgeEngine>,
    store: Arc<dyn KnowledgeStore>,
}

impl Runtime {
    async fn open(config: Config) -> Result<Self> {
        let store = memory::open_store(&config.storage).await?;
        let engine = Arc::new(KnowledgeEngine::new(config.learning.clone()));

        if let Some(kb) = store
            .load(config.learning.max_interactions)
            .await
            .context("Failed to load knowledge base")?
        {
            tracing::info!(
                "Loaded {} patterns and {} interactions",
                kb.patterns.len(),
                kb.interactions.len()
            );
            engine.restore(kb);
        }

        Ok(Self { config, engine, store })
    }

    async fn save(&self) -> Result<()> {
        self.store
            .save(&self.engine.snapshot())
            .await
            .context("Failed to save knowledge base")
    }
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_path()?,
    };

    // Config commands must work even when the file does not parse, so they
    // never reach dispatch
    if let Some(Commands::Config { show, reset }) = &cli.command {
        return handle_config(&config_path, *show, *reset);
    }

    let config = Config::load_from(&config_path)?;
    logging::init(&config.logging)?;
    logging::log_startup(crate::VERSION);

    let runtime = Runtime::open(config).await?;
    let result = dispatch(cli.command.unwrap_or(Commands::Chat), &runtime).await;

    logging::log_shutdown();
    result
}

async fn dispatch(command: Commands, runtime: &Runtime) -> Result<()> {
    match command {
        Commands::Chat => {
            let model = Arc::new(OllamaClient::new(runtime.config.model.clone())?);
            let storage = &runtime.config.storage;
            let schedule = SaveSchedule {
                save_every: Duration::from_secs(runtime.config.learning.save_interval),
                backup_every: storage
                    .backup_enabled
                    .then(|| Duration::from_secs(storage.backup_interval)),
            };
            let transcriber = if runtime.config.speech.enabled {
                Some(Transcriber::new(runtime.config.speech.clone())?)
            } else {
                None
            };
            agent::run_chat(
                runtime.engine.clone(),
                runtime.store.clone(),
                model,
                transcriber,
                schedule,
            )
            .await
        }
        Commands::Stats => {
            print_stats(&runtime.engine);
            Ok(())
        }
        Commands::Recent { count } => {
            print_interactions(&runtime.engine.recent_interactions(count));
            Ok(())
        }
        Commands::Patterns => {
            print_patterns(&runtime.engine);
            Ok(())
        }
        Commands::Feedback { id, rating, comment } => {
            runtime.engine.add_feedback(&id, rating, comment)?;
            runtime.save().await?;
            println!("Feedback {} recorded for {}", rating, id);
            Ok(())
        }
        Commands::Export { output } => {
            let document = runtime.engine.export()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, document)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Knowledge base exported to {}", path.display());
                }
                None => println!("{}", document),
            }
            Ok(())
        }
        Commands::Import { file } => {
            let document = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            runtime
                .engine
                .import(&document)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            runtime
                .store
                .replace(&runtime.engine.snapshot())
                .await
                .context("Failed to store imported knowledge base")?;

            let stats = runtime.engine.stats();
            println!(
                "Imported {} patterns and {} interactions ({} total recorded)",
                runtime.engine.patterns().len(),
                runtime.engine.recent_interactions(usize::MAX).len(),
                stats.total_interactions
            );
            Ok(())
        }
        Commands::Backup => {
            match runtime.store.backup().await? {
                Some(path) => println!("Backup written to {}", path.display()),
                None => println!("Backups are disabled (storage.backup_enabled = false)"),
            }
            Ok(())
        }
        Commands::Transcribe { file } => {
            let transcriber = Transcriber::new(runtime.config.speech.clone())?;
            let text = transcriber
                .transcribe_file(&file)
                .await
                .with_context(|| format!("Failed to transcribe {}", file.display()))?;
            println!("{}", text);
            Ok(())
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn handle_config(path: &Path, show: bool, reset: bool) -> Result<()> {
    if reset {
        config::reset_config(path)?;
    }
    if show || !reset {
        config::show_config(path)?;
    }
    Ok(())
}

fn print_stats(engine: &KnowledgeEngine) {
    let stats = engine.stats();
    println!("Knowledge Base Statistics");
    println!("  Total interactions: {}", stats.total_interactions);
    println!("  Positive feedback:  {}", stats.positive_feedback);
    println!("  Negative feedback:  {}", stats.negative_feedback);
    println!("  Average rating:     {:.2}", stats.average_rating);
    println!(
        "  Last updated:       {}",
        stats.last_updated.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_interactions(interactions: &[Interaction]) {
    if interactions.is_empty() {
        println!("No interactions recorded yet.");
        return;
    }

    for interaction in interactions {
        let rating = interaction
            .rating()
            .map(|r| format!("{}/5", r))
            .unwrap_or_else(|| "unrated".to_string());
        println!(
            "{} [{}] intent={} ({})",
            interaction.id,
            interaction.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            interaction.intent,
            rating
        );
        println!("  > {}", interaction.user_input);
        println!("  < {}", interaction.response);
    }
}

fn print_patterns(engine: &KnowledgeEngine) {
    let patterns = engine.patterns();
    if patterns.is_empty() {
        println!("No patterns learned yet.");
        return;
    }

    let threshold = engine.config().confidence_threshold;
    println!("{:<20} {:>9} {:>10}  example", "intent", "frequency", "confidence");
    for (intent, pattern) in patterns {
        let marker = if pattern.confidence >= threshold { "*" } else { " " };
        println!(
            "{:<20} {:>9} {:>9.2}{}  {}",
            intent, pattern.frequency, pattern.confidence, marker, pattern.pattern
        );
    }
    println!("\n* = confident enough to be reused (threshold {:.2})", threshold);
}

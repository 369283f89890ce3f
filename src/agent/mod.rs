//! Conversational agent
//!
//! Glue between the local language model and the knowledge engine:
//! - `ollama`: HTTP client for the model, intent classification
//! - `session`: per-conversation turn handling
//! - `run_chat`: the interactive terminal loop with periodic save/backup and
//!   optional voice input

pub mod ollama;
pub mod session;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::info;

use crate::learning::{InteractionContext, KnowledgeEngine};
use crate::logging;
use crate::memory::KnowledgeStore;
use crate::speech::Transcriber;
use crate::types::Message;

pub use ollama::OllamaClient;
pub use session::{Session, TurnOutcome};

/// Intent label the model assigned to an input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedIntent {
    pub name: String,
    /// Model's own confidence, 0.0-1.0
    pub confidence: f64,
    pub entities: HashMap<String, String>,
}

impl Default for DetectedIntent {
    fn default() -> Self {
        Self {
            name: "conversation".to_string(),
            confidence: 0.5,
            entities: HashMap::new(),
        }
    }
}

/// What the session needs from a language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Classify the user's input
    async fn detect_intent(&self, text: &str) -> Result<DetectedIntent>;

    /// Produce a reply given auxiliary context and the recent chat history
    async fn generate_response(
        &self,
        input: &str,
        context: &InteractionContext,
        history: &[Message],
    ) -> Result<String>;

    /// Condense a conversation into a few sentences
    async fn summarize(&self, messages: &[Message]) -> Result<String>;
}

/// Persistence cadence for the chat loop
#[derive(Debug, Clone, Copy)]
pub struct SaveSchedule {
    pub save_every: Duration,
    /// `None` disables periodic backups
    pub backup_every: Option<Duration>,
}

async fn save_engine(engine: &KnowledgeEngine, store: &dyn KnowledgeStore) {
    match store.save(&engine.snapshot()).await {
        Ok(()) => info!("Knowledge base saved ({} backend)", store.name()),
        Err(e) => logging::log_error("storage", "save", &e),
    }
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

fn print_stats(engine: &KnowledgeEngine) {
    let stats = engine.stats();
    println!(
        "  interactions: {} | positive: {} | negative: {} | avg rating: {:.2}",
        stats.total_interactions,
        stats.positive_feedback,
        stats.negative_feedback,
        stats.average_rating
    );
}

async fn transcribe_input(transcriber: Option<&Transcriber>, path: &str) -> Result<String> {
    let Some(transcriber) = transcriber else {
        bail!("voice input is not configured (see the [speech] section)");
    };
    if path.is_empty() {
        bail!("usage: /voice <audio file>");
    }
    transcriber.transcribe_file(Path::new(path)).await
}

/// Interactive text chat on stdin/stdout.
///
/// Each turn is followed by an optional 1-5 rating prompt. The knowledge base
/// is saved on the configured schedule and once more on exit.
pub async fn run_chat(
    engine: Arc<KnowledgeEngine>,
    store: Arc<dyn KnowledgeStore>,
    model: Arc<dyn LanguageModel>,
    transcriber: Option<Transcriber>,
    schedule: SaveSchedule,
) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    run_chat_with_input(stdin, engine, store, model, transcriber, schedule).await
}

/// Chat loop over any line source.
///
/// A rating is answered on the line after a turn. Enter skips it, and a line
/// that is not a number is taken as the next message instead.
pub async fn run_chat_with_input<R>(
    input: R,
    engine: Arc<KnowledgeEngine>,
    store: Arc<dyn KnowledgeStore>,
    model: Arc<dyn LanguageModel>,
    transcriber: Option<Transcriber>,
    schedule: SaveSchedule,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut session = Session::new(engine.clone(), model);
    let mut lines = input.lines();

    let mut save_tick = tokio::time::interval(schedule.save_every.max(Duration::from_secs(1)));
    let mut backup_tick = tokio::time::interval(
        schedule
            .backup_every
            .unwrap_or(Duration::from_secs(3600))
            .max(Duration::from_secs(1)),
    );
    // Both intervals fire immediately on the first tick
    save_tick.tick().await;
    backup_tick.tick().await;

    // Interaction waiting for its rating
    let mut pending_rating: Option<String> = None;

    println!("Chat started. Type /stats for statistics, /summary to recap, /quit to exit.");
    if transcriber.is_some() {
        println!("Use /voice <audio file> to speak instead of typing.");
    }
    prompt("> ");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();

                if let Some(interaction_id) = pending_rating.take() {
                    if input.is_empty() {
                        prompt("> ");
                        continue;
                    }
                    if let Ok(rating) = input.parse::<i32>() {
                        match session.rate(&interaction_id, rating, None) {
                            Ok(()) => println!("  Thanks, rated {}.", rating),
                            Err(e) => logging::log_error("chat", "feedback", &e),
                        }
                        prompt("> ");
                        continue;
                    }
                }

                let message = match input {
                    "" => None,
                    "/quit" | "/exit" => break,
                    "/stats" => {
                        print_stats(&engine);
                        None
                    }
                    "/summary" => {
                        match session.summarize().await {
                            Ok(summary) => println!("\n{}\n", summary),
                            Err(e) => println!("  Could not summarize: {}", e),
                        }
                        None
                    }
                    voice if voice == "/voice" || voice.starts_with("/voice ") => {
                        match transcribe_input(transcriber.as_ref(), voice["/voice".len()..].trim()).await {
                            Ok(text) => {
                                println!("  (heard) {}", text);
                                Some(text)
                            }
                            Err(e) => {
                                println!("  Could not transcribe: {:#}", e);
                                None
                            }
                        }
                    }
                    text => Some(text.to_string()),
                };

                if let Some(message) = message {
                    match session.turn(&message).await {
                        Ok(outcome) => {
                            println!("\n{}\n", outcome.response);
                            println!("  [{} | intent: {}{}]",
                                outcome.interaction_id,
                                outcome.intent.name,
                                if outcome.pattern_reused { " | learned" } else { "" });
                            pending_rating = Some(outcome.interaction_id);
                            prompt("Rate this response 1-5 (Enter to skip): ");
                            continue;
                        }
                        Err(e) => {
                            logging::log_error("chat", "turn", &e);
                            println!("  Sorry, I could not answer that: {}", e);
                        }
                    }
                }
                prompt("> ");
            }
            _ = save_tick.tick() => {
                save_engine(&engine, store.as_ref()).await;
            }
            _ = backup_tick.tick(), if schedule.backup_every.is_some() => {
                if let Err(e) = store.backup().await {
                    logging::log_error("storage", "backup", &e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    save_engine(&engine, store.as_ref()).await;
    println!("Goodbye!");
    Ok(())
}

//! Local LLM client for the Ollama chat API
//!
//! Non-streaming `POST /api/chat`. Besides free-form replies, the client asks
//! the model to classify the user's intent in a small line-based format and
//! parses it leniently.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{DetectedIntent, LanguageModel};
use crate::config::ModelConfig;
use crate::learning::InteractionContext;
use crate::types::Message;

const INTENT_SYSTEM_PROMPT: &str = r#"You are an intent classifier.
Analyze the user's text and answer ONLY in this format:
INTENT: [intent_name]
CONFIDENCE: [0.0-1.0]
ENTITIES: [key1=value1, key2=value2]

Possible intents: greeting, farewell, question, command, conversation, help"#;

const SUMMARY_SYSTEM_PROMPT: &str =
    "Summarize the following conversation in 2-3 sentences, capturing the main points.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f64,
    /// Ollama's name for max tokens
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Message,
    #[serde(default)]
    done: bool,
}

/// Ollama API client
#[derive(Clone)]
pub struct OllamaClient {
    client: Arc<Client>,
    config: ModelConfig,
}

impl OllamaClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.ollama_url.trim_end_matches('/'))
    }

    /// Chat with the configured sampling settings
    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        self.chat_with(messages, self.config.temperature, self.config.max_tokens)
            .await
    }

    /// Chat with explicit sampling settings
    pub async fn chat_with(
        &self,
        messages: &[Message],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature,
                num_predict: max_tokens,
            },
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to reach Ollama at {} (is `ollama serve` running?)",
                    self.config.ollama_url
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama returned error {}: {}", status, body);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to decode Ollama response")?;
        debug!("Ollama replied ({} chars, done={})", parsed.message.content.len(), parsed.done);

        Ok(parsed.message.content)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn detect_intent(&self, text: &str) -> Result<DetectedIntent> {
        let messages = [Message::system(INTENT_SYSTEM_PROMPT), Message::user(text)];
        // Classification wants a short, low-temperature answer
        let raw = self
            .chat_with(&messages, 0.3, 150)
            .await
            .context("Failed to detect intent")?;
        Ok(parse_intent(&raw))
    }

    async fn generate_response(
        &self,
        input: &str,
        context: &InteractionContext,
        history: &[Message],
    ) -> Result<String> {
        let context_json = serde_json::to_string(context).unwrap_or_default();
        let system = format!(
            "You are KnowledgeAgent, a friendly and helpful personal assistant.\n\
             Answer clearly and concisely.\n\
             Current context: {}",
            context_json
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend_from_slice(history);
        messages.push(Message::user(input));

        self.chat(&messages)
            .await
            .context("Failed to generate response")
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String> {
        let transcript = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let request = [Message::system(SUMMARY_SYSTEM_PROMPT), Message::user(transcript)];
        self.chat_with(&request, 0.5, 200)
            .await
            .context("Failed to summarize conversation")
    }
}

fn strip_brackets(value: &str) -> &str {
    value.trim().trim_start_matches('[').trim_end_matches(']').trim()
}

/// Parse the classifier's `INTENT:` / `CONFIDENCE:` / `ENTITIES:` lines.
///
/// Missing or unreadable lines keep the defaults (`conversation`, 0.5, none).
pub fn parse_intent(response: &str) -> DetectedIntent {
    let mut intent = DetectedIntent::default();

    for line in response.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix("INTENT:") {
            let name = strip_brackets(name);
            if !name.is_empty() {
                intent.name = name.to_string();
            }
        } else if let Some(conf) = line.strip_prefix("CONFIDENCE:") {
            if let Ok(conf) = strip_brackets(conf).parse::<f64>() {
                intent.confidence = conf.clamp(0.0, 1.0);
            }
        } else if let Some(entities) = line.strip_prefix("ENTITIES:") {
            intent.entities = strip_brackets(entities)
                .split(',')
                .filter_map(|pair| {
                    let (key, value) = pair.split_once('=')?;
                    let (key, value) = (key.trim(), value.trim());
                    (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
                })
                .collect::<HashMap<_, _>>();
        }
    }

    intent
}

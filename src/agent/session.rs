//! Conversation session
//!
//! One user's conversation: asks the model for an intent and a reply, feeds
//! the exchange into the shared knowledge engine and forwards ratings.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use super::{DetectedIntent, LanguageModel};
use crate::learning::{Interaction, InteractionContext, KnowledgeEngine};
use crate::logging;
use crate::types::Message;

/// Chat messages kept for model context
const DEFAULT_MAX_HISTORY: usize = 20;

/// Result of one conversational turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Id assigned by the engine, used to attach feedback
    pub interaction_id: String,
    pub intent: DetectedIntent,
    pub response: String,
    /// Whether a learned pattern was offered to the model
    pub pattern_reused: bool,
}

pub struct Session {
    engine: Arc<KnowledgeEngine>,
    model: Arc<dyn LanguageModel>,
    history: Vec<Message>,
    max_history: usize,
}

impl Session {
    pub fn new(engine: Arc<KnowledgeEngine>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            engine,
            model,
            history: Vec::new(),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn engine(&self) -> &Arc<KnowledgeEngine> {
        &self.engine
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Run one turn: classify, answer, record.
    pub async fn turn(&mut self, input: &str) -> Result<TurnOutcome> {
        let intent = match self.model.detect_intent(input).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!("Intent detection failed, treating as conversation: {:#}", e);
                DetectedIntent::default()
            }
        };

        let mut prompt_context = InteractionContext::new();
        prompt_context.insert("intent".to_string(), json!(intent.name));

        let learned = self.engine.find_similar_pattern(&intent.name);
        if let Some(pattern) = &learned {
            prompt_context.insert("learned_response".to_string(), json!(pattern.response));
            prompt_context.insert("pattern_confidence".to_string(), json!(pattern.confidence));
        }
        let pattern_reused = learned.is_some();

        let response = self
            .model
            .generate_response(input, &prompt_context, &self.history)
            .await?;

        let interaction = Interaction::new(input, response.as_str(), intent.name.as_str())
            .with_context("intent_confidence", json!(intent.confidence))
            .with_context("entities", json!(intent.entities))
            .with_context("pattern_reused", json!(pattern_reused));
        let interaction_id = self.engine.record_interaction(interaction);

        logging::log_interaction(input, &response, &intent.name);

        self.push_history(Message::user(input));
        self.push_history(Message::assistant(response.as_str()));

        Ok(TurnOutcome {
            interaction_id,
            intent,
            response,
            pattern_reused,
        })
    }

    /// Rate a previous turn
    pub fn rate(&self, interaction_id: &str, rating: i32, comment: Option<String>) -> Result<()> {
        self.engine.add_feedback(interaction_id, rating, comment)?;
        Ok(())
    }

    /// Ask the model to recap the conversation so far
    pub async fn summarize(&self) -> Result<String> {
        if self.history.is_empty() {
            return Ok("Nothing to summarize yet.".to_string());
        }
        self.model.summarize(&self.history).await
    }

    fn push_history(&mut self, message: Message) {
        self.history.push(message);
        if self.history.len() > self.max_history {
            let excess = self.history.len() - self.max_history;
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{KnowledgeError, LearningConfig};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted model: fixed intent, echoes the input, remembers prompt contexts
    struct StubModel {
        intent: Option<&'static str>,
        contexts: Mutex<Vec<InteractionContext>>,
    }

    impl StubModel {
        fn new(intent: Option<&'static str>) -> Self {
            Self {
                intent,
                contexts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for StubModel {
        async fn detect_intent(&self, _text: &str) -> Result<DetectedIntent> {
            match self.intent {
                Some(name) => Ok(DetectedIntent {
                    name: name.to_string(),
                    confidence: 0.9,
                    entities: HashMap::from([("who".to_string(), "me".to_string())]),
                }),
                None => Err(anyhow!("model offline")),
            }
        }

        async fn generate_response(
            &self,
            input: &str,
            context: &InteractionContext,
            _history: &[Message],
        ) -> Result<String> {
            self.contexts.lock().unwrap().push(context.clone());
            Ok(format!("echo: {}", input))
        }

        async fn summarize(&self, messages: &[Message]) -> Result<String> {
            Ok(format!("{} messages", messages.len()))
        }
    }

    fn engine() -> Arc<KnowledgeEngine> {
        Arc::new(KnowledgeEngine::new(LearningConfig {
            learning_rate: 0.25,
            confidence_threshold: 0.7,
            max_interactions: 10,
            save_interval: 60,
        }))
    }

    #[tokio::test]
    async fn test_turn_records_interaction() {
        let engine = engine();
        let mut session = Session::new(engine.clone(), Arc::new(StubModel::new(Some("greeting"))));

        let outcome = session.turn("hello").await.unwrap();
        assert_eq!(outcome.response, "echo: hello");
        assert_eq!(outcome.intent.name, "greeting");
        assert!(!outcome.pattern_reused);

        let recorded = &engine.recent_interactions(1)[0];
        assert_eq!(recorded.id, outcome.interaction_id);
        assert_eq!(recorded.intent, "greeting");
        assert_eq!(recorded.context["pattern_reused"], json!(false));
        assert_eq!(recorded.context["entities"]["who"], "me");
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_intent_failure_falls_back_to_conversation() {
        let engine = engine();
        let mut session = Session::new(engine.clone(), Arc::new(StubModel::new(None)));

        let outcome = session.turn("anything").await.unwrap();
        assert_eq!(outcome.intent.name, "conversation");
        assert_eq!(engine.patterns()[0].0, "conversation");
    }

    #[tokio::test]
    async fn test_confident_pattern_is_offered_to_model() {
        let engine = engine();
        let model = Arc::new(StubModel::new(Some("greeting")));
        let mut session = Session::new(engine.clone(), model.clone());

        // 0.5 -> 0.75 once a positively rated greeting has been recorded
        engine.record_interaction(Interaction::new("hi", "hello!", "greeting"));
        engine.record_interaction(
            Interaction::new("hey", "hello!", "greeting")
                .with_feedback(crate::learning::Feedback::new(5, None)),
        );

        let outcome = session.turn("good morning").await.unwrap();
        assert!(outcome.pattern_reused);

        let contexts = model.contexts.lock().unwrap();
        assert_eq!(contexts[0]["learned_response"], "hello!");
    }

    #[tokio::test]
    async fn test_rate_forwards_to_engine() {
        let engine = engine();
        let mut session = Session::new(engine.clone(), Arc::new(StubModel::new(Some("question"))));
        let outcome = session.turn("why?").await.unwrap();

        session.rate(&outcome.interaction_id, 5, Some("great".to_string())).unwrap();
        assert_eq!(engine.stats().positive_feedback, 1);

        let err = session.rate("int_0", 5, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KnowledgeError>(),
            Some(KnowledgeError::InteractionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let mut session = Session::new(engine(), Arc::new(StubModel::new(Some("question"))))
            .with_max_history(4);
        for i in 0..5 {
            session.turn(&format!("q{}", i)).await.unwrap();
        }
        assert_eq!(session.history().len(), 4);
        assert_eq!(session.history()[0], Message::user("q3"));
    }

    #[tokio::test]
    async fn test_summarize_uses_history() {
        let mut session = Session::new(engine(), Arc::new(StubModel::new(Some("question"))));
        assert_eq!(session.summarize().await.unwrap(), "Nothing to summarize yet.");

        session.turn("what time is it?").await.unwrap();
        assert_eq!(session.summarize().await.unwrap(), "2 messages");
    }
}

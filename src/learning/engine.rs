//! Knowledge engine - online learning over recorded interactions
//!
//! Keeps a bounded window of recent interactions, one pattern per intent and
//! aggregate feedback statistics, all behind a single read/write lock.
//! Nothing here performs I/O; persistence is done by callers through
//! [`KnowledgeEngine::snapshot`] / [`KnowledgeEngine::restore`] or the JSON
//! export document.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::error::{KnowledgeError, KnowledgeResult};
use super::model::{Feedback, Interaction, KnowledgeBase, Pattern, Stats};

/// Confidence given to a pattern the first time its intent is seen
pub const INITIAL_CONFIDENCE: f64 = 0.5;

/// Learning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Confidence increment per positively rated interaction
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Minimum confidence for a pattern to be offered for reuse
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Size of the retained interaction window (must be > 0)
    #[serde(default = "default_max_interactions")]
    pub max_interactions: usize,
    /// Advisory persistence interval in seconds; the engine never saves by itself
    #[serde(default = "default_save_interval")]
    pub save_interval: u64,
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_max_interactions() -> usize {
    1000
}

fn default_save_interval() -> u64 {
    300
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            confidence_threshold: default_confidence_threshold(),
            max_interactions: default_max_interactions(),
            save_interval: default_save_interval(),
        }
    }
}

struct EngineState {
    kb: KnowledgeBase,
    /// Last nanosecond stamp handed out as an id, so ids stay unique on coarse clocks
    last_id_nanos: i64,
}

/// Concurrency-safe store of interactions, patterns and stats.
///
/// Share it between sessions with `Arc<KnowledgeEngine>`.
pub struct KnowledgeEngine {
    state: RwLock<EngineState>,
    config: LearningConfig,
}

impl KnowledgeEngine {
    pub fn new(config: LearningConfig) -> Self {
        Self {
            state: RwLock::new(EngineState {
                kb: KnowledgeBase::new(),
                last_id_nanos: 0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    // A panic while holding the guard cannot leave the knowledge base half-updated
    // in a way later readers would trip over, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new interaction and learn from it.
    ///
    /// The engine assigns `id` and `timestamp`, overwriting whatever the caller
    /// set. Returns the assigned id so feedback can be attached later.
    pub fn record_interaction(&self, mut interaction: Interaction) -> String {
        let mut state = self.write();
        let now = Utc::now();

        let nanos = now.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let nanos = nanos.max(state.last_id_nanos.saturating_add(1));
        state.last_id_nanos = nanos;

        interaction.id = format!("int_{}", nanos);
        interaction.timestamp = now;
        let id = interaction.id.clone();

        let kb = &mut state.kb;
        kb.stats.total_interactions += 1;
        kb.stats.last_updated = now;

        Self::learn_pattern(kb, &interaction, self.config.learning_rate);

        kb.interactions.push(interaction);
        kb.truncate_window(self.config.max_interactions);

        debug!(
            "Recorded interaction {} (window {}/{})",
            id,
            kb.interactions.len(),
            self.config.max_interactions
        );
        id
    }

    /// Update the pattern for this interaction's intent.
    ///
    /// Confidence rises by `learning_rate` when the interaction carries a
    /// positive rating, or when positive feedback was attached to an earlier
    /// interaction of the same intent since it was last recorded. Feedback
    /// never changes confidence retroactively.
    fn learn_pattern(kb: &mut KnowledgeBase, interaction: &Interaction, learning_rate: f64) {
        let now = Utc::now();

        match kb.patterns.get_mut(&interaction.intent) {
            Some(pattern) => {
                pattern.frequency += 1;
                pattern.last_used = now;

                let carried = interaction.feedback.as_ref().is_some_and(Feedback::is_positive);
                if carried || pattern.pending_feedback {
                    pattern.confidence = (pattern.confidence + learning_rate).min(1.0);
                    debug!(
                        "Pattern '{}' confidence raised to {:.2}",
                        interaction.intent, pattern.confidence
                    );
                }
                pattern.pending_feedback = false;
            }
            None => {
                kb.patterns.insert(
                    interaction.intent.clone(),
                    Pattern {
                        pattern: interaction.user_input.clone(),
                        response: interaction.response.clone(),
                        frequency: 1,
                        confidence: INITIAL_CONFIDENCE,
                        last_used: now,
                        pending_feedback: false,
                    },
                );
                debug!("Learned new pattern for intent '{}'", interaction.intent);
            }
        }
    }

    /// Attach (or overwrite) feedback on a retained interaction.
    ///
    /// The positive/negative counters are lifetime counts and fire on every
    /// call, while the average is recomputed from the current window. A
    /// positive rating leaves confidence alone and only marks the intent's
    /// pattern, so the bump lands on the next interaction with that intent.
    pub fn add_feedback(
        &self,
        interaction_id: &str,
        rating: i32,
        comment: Option<String>,
    ) -> KnowledgeResult<()> {
        let mut state = self.write();
        let kb = &mut state.kb;

        let interaction = kb
            .interactions
            .iter_mut()
            .find(|i| i.id == interaction_id)
            .ok_or_else(|| KnowledgeError::InteractionNotFound(interaction_id.to_string()))?;

        let feedback = Feedback::new(rating, comment);
        if feedback.is_positive() {
            kb.stats.positive_feedback += 1;
            if let Some(pattern) = kb.patterns.get_mut(&interaction.intent) {
                pattern.pending_feedback = true;
            }
        } else if feedback.is_negative() {
            kb.stats.negative_feedback += 1;
        }
        interaction.feedback = Some(feedback);

        if let Some(mean) = kb.mean_rating() {
            kb.stats.average_rating = mean;
        }

        debug!("Feedback {} attached to {}", rating, interaction_id);
        Ok(())
    }

    /// Look up a reusable pattern by exact intent.
    ///
    /// Patterns below the confidence threshold are treated as unknown.
    pub fn find_similar_pattern(&self, intent: &str) -> Option<Pattern> {
        let state = self.read();
        state
            .kb
            .patterns
            .get(intent)
            .filter(|p| p.confidence >= self.config.confidence_threshold)
            .cloned()
    }

    /// All patterns in key order, regardless of confidence
    pub fn patterns(&self) -> Vec<(String, Pattern)> {
        let state = self.read();
        state
            .kb
            .patterns
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect()
    }

    pub fn stats(&self) -> Stats {
        self.read().kb.stats.clone()
    }

    /// The last `n` retained interactions, oldest first
    pub fn recent_interactions(&self, n: usize) -> Vec<Interaction> {
        let state = self.read();
        let window = &state.kb.interactions;
        let start = window.len().saturating_sub(n);
        window[start..].to_vec()
    }

    /// Copy of the full knowledge base
    pub fn snapshot(&self) -> KnowledgeBase {
        self.read().kb.clone()
    }

    /// Replace the full knowledge base
    pub fn restore(&self, kb: KnowledgeBase) {
        let mut state = self.write();
        state.kb = kb;
        debug!(
            "Knowledge base restored: {} patterns, {} interactions",
            state.kb.patterns.len(),
            state.kb.interactions.len()
        );
    }

    /// Serialize the knowledge base to a pretty JSON document
    pub fn export(&self) -> KnowledgeResult<String> {
        let state = self.read();
        serde_json::to_string_pretty(&state.kb).map_err(KnowledgeError::Serialize)
    }

    /// Replace the knowledge base from a JSON document.
    ///
    /// The document is fully decoded before the lock is taken, so a malformed
    /// document leaves the current state untouched.
    pub fn import(&self, data: &str) -> KnowledgeResult<()> {
        let kb: KnowledgeBase = serde_json::from_str(data)?;
        self.restore(kb);
        Ok(())
    }
}

impl Default for KnowledgeEngine {
    fn default() -> Self {
        Self::new(LearningConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(max: usize) -> KnowledgeEngine {
        KnowledgeEngine::new(LearningConfig {
            learning_rate: 0.1,
            confidence_threshold: 0.7,
            max_interactions: max,
            save_interval: 60,
        })
    }

    #[test]
    fn test_record_assigns_id_and_timestamp() {
        let engine = engine(10);
        let mut interaction = Interaction::new("hi", "hello", "greeting");
        interaction.id = "client-supplied".to_string();

        let id = engine.record_interaction(interaction);
        assert!(id.starts_with("int_"));

        let recent = engine.recent_interactions(1);
        assert_eq!(recent[0].id, id);
        assert_eq!(engine.stats().total_interactions, 1);
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let engine = engine(100);
        let ids: Vec<String> = (0..50)
            .map(|_| engine.record_interaction(Interaction::new("a", "b", "c")))
            .collect();

        let nanos: Vec<i64> = ids
            .iter()
            .map(|id| id.trim_start_matches("int_").parse().unwrap())
            .collect();
        assert!(nanos.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_new_pattern_defaults() {
        let engine = engine(10);
        engine.record_interaction(Interaction::new("hi there", "hello!", "greeting"));

        let patterns = engine.patterns();
        assert_eq!(patterns.len(), 1);
        let (key, pattern) = &patterns[0];
        assert_eq!(key, "greeting");
        assert_eq!(pattern.pattern, "hi there");
        assert_eq!(pattern.response, "hello!");
        assert_eq!(pattern.frequency, 1);
        assert_eq!(pattern.confidence, INITIAL_CONFIDENCE);
    }

    #[test]
    fn test_intents_are_not_normalized() {
        let engine = engine(10);
        engine.record_interaction(Interaction::new("hi", "hello", "Greeting"));
        engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        assert_eq!(engine.patterns().len(), 2);
    }

    #[test]
    fn test_empty_strings_accepted() {
        let engine = engine(10);
        engine.record_interaction(Interaction::new("", "", ""));
        assert_eq!(engine.stats().total_interactions, 1);
        assert_eq!(engine.patterns()[0].0, "");
    }

    #[test]
    fn test_feedback_carried_on_record_raises_confidence() {
        let engine = engine(10);
        engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        engine.record_interaction(
            Interaction::new("hey", "hello", "greeting").with_feedback(Feedback::new(4, None)),
        );
        let (_, pattern) = &engine.patterns()[0];
        assert!((pattern.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_attached_feedback_applies_to_next_record_only() {
        let engine = engine(10);
        let a = engine.record_interaction(Interaction::new("hi", "hello", "greeting"));

        engine.add_feedback(&a, 5, None).unwrap();
        let (_, pattern) = &engine.patterns()[0];
        assert_eq!(pattern.confidence, INITIAL_CONFIDENCE);
        assert!(pattern.pending_feedback);

        engine.record_interaction(Interaction::new("hey", "hello", "greeting"));
        let (_, pattern) = &engine.patterns()[0];
        assert!((pattern.confidence - 0.6).abs() < 1e-9);
        assert!(!pattern.pending_feedback);

        // Consumed: a further record without new feedback changes nothing
        engine.record_interaction(Interaction::new("yo", "hello", "greeting"));
        assert!((engine.patterns()[0].1.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_feedback_bumps_once() {
        let engine = engine(10);
        let a = engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        let b = engine.record_interaction(Interaction::new("hey", "hello", "greeting"));
        engine.add_feedback(&a, 5, None).unwrap();
        engine.add_feedback(&b, 4, None).unwrap();

        engine.record_interaction(
            Interaction::new("yo", "hello", "greeting").with_feedback(Feedback::new(5, None)),
        );
        assert!((engine.patterns()[0].1.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_neutral_feedback_marks_nothing() {
        let engine = engine(10);
        let a = engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        engine.add_feedback(&a, 3, None).unwrap();
        engine.add_feedback(&a, 1, None).unwrap();

        assert!(!engine.patterns()[0].1.pending_feedback);
        engine.record_interaction(Interaction::new("hey", "hello", "greeting"));
        assert_eq!(engine.patterns()[0].1.confidence, INITIAL_CONFIDENCE);
    }

    #[test]
    fn test_low_rating_never_lowers_confidence() {
        let engine = engine(10);
        engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        engine.record_interaction(
            Interaction::new("hi", "hello", "greeting").with_feedback(Feedback::new(1, None)),
        );
        let (_, pattern) = &engine.patterns()[0];
        assert_eq!(pattern.confidence, INITIAL_CONFIDENCE);
        assert_eq!(pattern.frequency, 2);
    }

    #[test]
    fn test_confidence_capped_at_one() {
        let engine = KnowledgeEngine::new(LearningConfig {
            learning_rate: 0.4,
            ..LearningConfig::default()
        });
        engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        for _ in 0..5 {
            engine.record_interaction(
                Interaction::new("hi", "hello", "greeting").with_feedback(Feedback::new(5, None)),
            );
        }
        let (_, pattern) = &engine.patterns()[0];
        assert_eq!(pattern.confidence, 1.0);
    }

    #[test]
    fn test_feedback_counters_and_average() {
        let engine = engine(10);
        let a = engine.record_interaction(Interaction::new("a", "a", "x"));
        let b = engine.record_interaction(Interaction::new("b", "b", "x"));
        let c = engine.record_interaction(Interaction::new("c", "c", "x"));

        engine.add_feedback(&a, 5, None).unwrap();
        engine.add_feedback(&b, 1, Some("bad".to_string())).unwrap();
        engine.add_feedback(&c, 3, None).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.positive_feedback, 1);
        assert_eq!(stats.negative_feedback, 1);
        assert!((stats.average_rating - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_feedback_recounts_but_average_uses_latest() {
        let engine = engine(10);
        let id = engine.record_interaction(Interaction::new("a", "a", "x"));

        engine.add_feedback(&id, 5, None).unwrap();
        engine.add_feedback(&id, 1, None).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.positive_feedback, 1);
        assert_eq!(stats.negative_feedback, 1);
        assert_eq!(stats.average_rating, 1.0);
        assert_eq!(engine.recent_interactions(1)[0].rating(), Some(1));
    }

    #[test]
    fn test_average_reflects_eviction() {
        let engine = engine(2);
        let a = engine.record_interaction(Interaction::new("a", "a", "x"));
        engine.add_feedback(&a, 1, None).unwrap();

        engine.record_interaction(Interaction::new("b", "b", "x"));
        let c = engine.record_interaction(Interaction::new("c", "c", "x"));
        engine.add_feedback(&c, 5, None).unwrap();

        // `a` has been evicted, so only `c` counts
        assert_eq!(engine.stats().average_rating, 5.0);
        assert_eq!(engine.stats().negative_feedback, 1);
    }

    #[test]
    fn test_feedback_on_evicted_interaction_fails() {
        let engine = engine(1);
        let a = engine.record_interaction(Interaction::new("a", "a", "x"));
        engine.record_interaction(Interaction::new("b", "b", "x"));

        let err = engine.add_feedback(&a, 5, None).unwrap_err();
        assert!(matches!(err, KnowledgeError::InteractionNotFound(ref id) if *id == a));
        assert!(err.to_string().contains(&a));
    }

    #[test]
    fn test_recent_interactions_bounds() {
        let engine = engine(10);
        assert!(engine.recent_interactions(5).is_empty());

        for i in 0..3 {
            engine.record_interaction(Interaction::new(format!("{}", i), "r", "x"));
        }
        assert_eq!(engine.recent_interactions(0).len(), 0);
        assert_eq!(engine.recent_interactions(2).len(), 2);
        assert_eq!(engine.recent_interactions(2)[0].user_input, "1");
        assert_eq!(engine.recent_interactions(100).len(), 3);
    }

    #[test]
    fn test_find_similar_pattern_threshold_gate() {
        let engine = KnowledgeEngine::new(LearningConfig {
            learning_rate: 0.25,
            confidence_threshold: 0.7,
            ..LearningConfig::default()
        });
        engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        assert!(engine.find_similar_pattern("greeting").is_none());
        assert!(engine.find_similar_pattern("unknown").is_none());

        engine.record_interaction(
            Interaction::new("hi", "hello", "greeting").with_feedback(Feedback::new(5, None)),
        );
        let found = engine.find_similar_pattern("greeting").expect("pattern above threshold");
        assert!((found.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_import_keeps_state() {
        let engine = engine(10);
        engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        let before = engine.snapshot();

        let err = engine.import("{ not json").unwrap_err();
        assert!(matches!(err, KnowledgeError::MalformedSnapshot(_)));

        let err = engine.import(r#"{"patterns": 3}"#).unwrap_err();
        assert!(matches!(err, KnowledgeError::MalformedSnapshot(_)));

        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn test_export_shape() {
        let engine = engine(10);
        let id = engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        engine.add_feedback(&id, 4, Some("good".to_string())).unwrap();

        let doc: serde_json::Value = serde_json::from_str(&engine.export().unwrap()).unwrap();
        assert_eq!(doc["patterns"]["greeting"]["frequency"], 1);
        assert_eq!(doc["interactions"][0]["id"], id.as_str());
        assert_eq!(doc["interactions"][0]["feedback"]["rating"], 4);
        assert_eq!(doc["interactions"][0]["feedback"]["comment"], "good");
        assert_eq!(doc["stats"]["positive_feedback"], 1);
        assert_eq!(doc["stats"]["average_rating"], 4.0);
    }
}

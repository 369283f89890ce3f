//! Knowledge base data model
//!
//! Plain records shared between the engine, the persistence backends and the
//! export document. Field names are the stable wire tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Free-form auxiliary data attached to an interaction
pub type InteractionContext = HashMap<String, serde_json::Value>;

/// One exchange between the user and the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Engine-assigned identifier (`int_<unix-nanos>`)
    #[serde(default)]
    pub id: String,
    /// Engine-assigned creation time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// What the user said
    pub user_input: String,
    /// What the agent answered
    pub response: String,
    /// Intent label detected for the input
    pub intent: String,
    /// User rating, attached after the fact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    /// Auxiliary data, opaque to the engine
    #[serde(default)]
    pub context: InteractionContext,
}

impl Interaction {
    /// Build an interaction ready to be recorded.
    ///
    /// `id` and `timestamp` are placeholders; the engine overwrites both.
    pub fn new(
        user_input: impl Into<String>,
        response: impl Into<String>,
        intent: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            timestamp: Utc::now(),
            user_input: user_input.into(),
            response: response.into(),
            intent: intent.into(),
            feedback: None,
            context: InteractionContext::new(),
        }
    }

    /// Attach a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Attach feedback up front (mostly useful for imports and tests)
    pub fn with_feedback(mut self, feedback: Feedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn rating(&self) -> Option<i32> {
        self.feedback.as_ref().map(|f| f.rating)
    }
}

/// User rating of a single interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Nominally 1-5; out-of-range values are accepted as given
    pub rating: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Feedback {
    pub fn new(rating: i32, comment: Option<String>) -> Self {
        Self {
            rating,
            comment: comment.filter(|c| !c.is_empty()),
            timestamp: Utc::now(),
        }
    }

    /// Rating of 4 or more
    pub fn is_positive(&self) -> bool {
        self.rating >= 4
    }

    /// Rating of 2 or less
    pub fn is_negative(&self) -> bool {
        self.rating <= 2
    }
}

/// What the engine remembers about one intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Example input seen for this intent
    pub pattern: String,
    /// Example response given for this intent
    pub response: String,
    /// Number of interactions that mapped to this intent
    pub frequency: u64,
    /// Trust in this pattern for reuse, always within [0, 1]
    pub confidence: f64,
    pub last_used: DateTime<Utc>,
    /// Positive feedback arrived since this intent was last recorded; the
    /// next interaction for the intent applies it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending_feedback: bool,
}

/// Aggregate feedback statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_interactions: u64,
    /// Lifetime count of ratings >= 4 (re-counted on repeated feedback)
    pub positive_feedback: u64,
    /// Lifetime count of ratings <= 2 (re-counted on repeated feedback)
    pub negative_feedback: u64,
    /// Mean rating over the retained window only
    pub average_rating: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_interactions: 0,
            positive_feedback: 0,
            negative_feedback: 0,
            average_rating: 0.0,
            last_updated: Utc::now(),
        }
    }
}

/// Full engine state, as exported and imported
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    /// Patterns keyed by intent, in key order
    pub patterns: BTreeMap<String, Pattern>,
    /// Retained interaction window, oldest first
    pub interactions: Vec<Interaction>,
    pub stats: Stats,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the `max` most recent interactions, preserving order
    pub fn truncate_window(&mut self, max: usize) {
        if self.interactions.len() > max {
            let excess = self.interactions.len() - max;
            self.interactions.drain(..excess);
        }
    }

    /// Mean rating over interactions that carry feedback, if any do
    pub fn mean_rating(&self) -> Option<f64> {
        let (sum, count) = self
            .interactions
            .iter()
            .filter_map(Interaction::rating)
            .fold((0.0_f64, 0_u64), |(sum, count), r| (sum + f64::from(r), count + 1));

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

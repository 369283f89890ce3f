//! Online learning layer
//!
//! Remembers which inputs produced which responses, how users rated them,
//! and which intents have earned enough confidence to be reused.

pub mod engine;
pub mod error;
pub mod model;

pub use engine::{KnowledgeEngine, LearningConfig, INITIAL_CONFIDENCE};
pub use error::{KnowledgeError, KnowledgeResult};
pub use model::{Feedback, Interaction, InteractionContext, KnowledgeBase, Pattern, Stats};

//! Knowledge Agent - Personal Conversational Agent Library
//!
//! A local-first assistant with:
//! - A knowledge engine that learns per-intent response patterns from feedback
//! - JSON or SQLite persistence with timestamped backups
//! - Ollama integration for intent detection and replies
//! - Structured logging and TOML configuration
//!
//! # Example
//!
//! ```
//! use knowledge_agent::{Interaction, KnowledgeEngine, LearningConfig};
//!
//! let engine = KnowledgeEngine::new(LearningConfig::default());
//! let id = engine.record_interaction(Interaction::new("hi", "hello!", "greeting"));
//! engine.add_feedback(&id, 5, None).unwrap();
//! assert_eq!(engine.stats().positive_feedback, 1);
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod learning;
pub mod config;
pub mod memory; // Must come before agent since agent depends on memory
pub mod logging;
pub mod speech;
pub mod agent;
pub mod cli;

// Re-export commonly used types for convenience
pub use learning::{
    Feedback,
    Interaction,
    InteractionContext,
    KnowledgeBase,
    KnowledgeEngine,
    KnowledgeError,
    KnowledgeResult,
    LearningConfig,
    Pattern,
    Stats,
};

pub use memory::{
    open_store,
    KnowledgeStore,
    StorageBackend,
    StorageConfig,
};

pub use agent::{
    DetectedIntent,
    LanguageModel,
    OllamaClient,
    Session,
};

pub use speech::{SpeechConfig, SpeechProvider, Transcriber};

pub use config::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Personal Conversational Agent Library", NAME, VERSION)
}

//! Knowledge engine errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Feedback targeted an id that is not (or no longer) in the retained window
    #[error("interaction not found: {0}")]
    InteractionNotFound(String),

    /// Import document did not decode into a knowledge base
    #[error("malformed knowledge snapshot: {0}")]
    MalformedSnapshot(#[from] serde_json::Error),

    #[error("failed to serialize knowledge base: {0}")]
    Serialize(#[source] serde_json::Error),
}

pub type KnowledgeResult<T> = std::result::Result<T, KnowledgeError>;

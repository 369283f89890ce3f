//! Persistent storage for the knowledge base
//!
//! Provides:
//! - Flat-file JSON storage (interactions/patterns/stats files)
//! - SQLite storage with an accumulating interaction log
//! - Timestamped backups for either backend
//!
//! The engine itself never touches storage; callers hand snapshots back and forth.

pub mod json;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::learning::KnowledgeBase;

pub use json::JsonStore;
pub use sqlite::SqliteStore;

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Json,
    Sqlite,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Json => write!(f, "json"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Directory for JSON storage, database file (or its directory) for SQLite
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Write timestamped backups
    #[serde(default = "default_true")]
    pub backup_enabled: bool,
    /// Seconds between automatic backups during a chat session
    #[serde(default = "default_backup_interval")]
    pub backup_interval: u64,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Json
}

fn default_storage_path() -> PathBuf {
    crate::config::data_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("knowledge")
}

fn default_true() -> bool {
    true
}

fn default_backup_interval() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_storage_path(),
            backup_enabled: true,
            backup_interval: default_backup_interval(),
        }
    }
}

/// A place the knowledge base can be saved to and loaded from
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Backend label for logs
    fn name(&self) -> &'static str;

    /// Persist a full snapshot
    async fn save(&self, kb: &KnowledgeBase) -> Result<()>;

    /// Persist a snapshot that supersedes everything stored so far, such as
    /// an imported knowledge base. Backends that keep history beyond the
    /// snapshot must drop it here.
    async fn replace(&self, kb: &KnowledgeBase) -> Result<()> {
        self.save(kb).await
    }

    /// Load the stored knowledge base, keeping at most `max_interactions`
    /// of the most recent interactions. `None` when nothing has been saved yet.
    async fn load(&self, max_interactions: usize) -> Result<Option<KnowledgeBase>>;

    /// Write a timestamped backup. `None` when backups are disabled.
    async fn backup(&self) -> Result<Option<PathBuf>>;
}

/// Open the backend selected by the configuration
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn KnowledgeStore>> {
    let store: Arc<dyn KnowledgeStore> = match config.backend {
        StorageBackend::Json => {
            Arc::new(JsonStore::new(&config.path, config.backup_enabled).await?)
        }
        StorageBackend::Sqlite => {
            let db_path = if config.path.extension().is_some() {
                config.path.clone()
            } else {
                config.path.join("knowledge.db")
            };
            Arc::new(SqliteStore::new(&db_path, config.backup_enabled).await?)
        }
    };
    tracing::info!("Using {} storage at {}", store.name(), config.path.display());
    Ok(store)
}

/// File-name timestamp for backups, fine enough for back-to-back backups
pub(crate) fn backup_stamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%6f").to_string()
}

//! Flat-file JSON storage
//!
//! Keeps `interactions.json`, `patterns.json` and `stats.json` side by side in
//! one directory. Each file is written to a temporary sibling and renamed into
//! place, so a crash mid-save leaves the previous file intact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{backup_stamp, KnowledgeStore};
use crate::learning::{Interaction, KnowledgeBase, Pattern, Stats};

const INTERACTIONS_FILE: &str = "interactions.json";
const PATTERNS_FILE: &str = "patterns.json";
const STATS_FILE: &str = "stats.json";

/// Backup document: the full snapshot plus when it was taken
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonBackup {
    #[serde(flatten)]
    pub knowledge: KnowledgeBase,
    pub timestamp: DateTime<Utc>,
}

/// JSON file store rooted at a directory
pub struct JsonStore {
    dir: PathBuf,
    backup_enabled: bool,
}

impl JsonStore {
    /// Open (creating if needed) a store in `dir`
    pub async fn new<P: AsRef<Path>>(dir: P, backup_enabled: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        Ok(Self { dir, backup_enabled })
    }

    async fn write_json<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(value)?;

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
        let path = self.dir.join(file);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl KnowledgeStore for JsonStore {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn save(&self, kb: &KnowledgeBase) -> Result<()> {
        self.write_json(INTERACTIONS_FILE, &kb.interactions).await?;
        self.write_json(PATTERNS_FILE, &kb.patterns).await?;
        self.write_json(STATS_FILE, &kb.stats).await?;
        debug!(
            "Saved {} interactions and {} patterns to {}",
            kb.interactions.len(),
            kb.patterns.len(),
            self.dir.display()
        );
        Ok(())
    }

    async fn load(&self, max_interactions: usize) -> Result<Option<KnowledgeBase>> {
        let interactions: Option<Vec<Interaction>> = self.read_json(INTERACTIONS_FILE).await?;
        let patterns: Option<BTreeMap<String, Pattern>> = self.read_json(PATTERNS_FILE).await?;
        let stats: Option<Stats> = self.read_json(STATS_FILE).await?;

        if interactions.is_none() && patterns.is_none() && stats.is_none() {
            return Ok(None);
        }

        let mut kb = KnowledgeBase {
            patterns: patterns.unwrap_or_default(),
            interactions: interactions.unwrap_or_default(),
            stats: stats.unwrap_or_default(),
        };
        kb.truncate_window(max_interactions);
        Ok(Some(kb))
    }

    async fn backup(&self) -> Result<Option<PathBuf>> {
        if !self.backup_enabled {
            return Ok(None);
        }

        let knowledge = self.load(usize::MAX).await?.unwrap_or_default();
        let backup_dir = self.dir.join("backups");
        tokio::fs::create_dir_all(&backup_dir)
            .await
            .context("Failed to create backup directory")?;

        let path = backup_dir.join(format!("backup_{}.json", backup_stamp()));
        let doc = JsonBackup {
            knowledge,
            timestamp: Utc::now(),
        };
        tokio::fs::write(&path, serde_json::to_string_pretty(&doc)?)
            .await
            .with_context(|| format!("Failed to write backup {}", path.display()))?;

        info!("Backup written to {}", path.display());
        Ok(Some(path))
    }
}

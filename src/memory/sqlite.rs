//! SQLite-based persistent storage for the knowledge base
//!
//! Interactions accumulate in the `interactions` table beyond the engine's
//! retained window; loading reads back only the newest rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{backup_stamp, KnowledgeStore};
use crate::learning::{Feedback, Interaction, KnowledgeBase, Pattern, Stats};

/// SQLite knowledge store
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    backup_enabled: bool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub async fn new<P: AsRef<Path>>(path: P, backup_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        // WAL for concurrent readers while a chat session is saving
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            backup_enabled,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                user_input TEXT NOT NULL,
                response TEXT NOT NULL,
                intent TEXT NOT NULL,
                context TEXT NOT NULL DEFAULT '{}',
                feedback_rating INTEGER,
                feedback_comment TEXT,
                feedback_timestamp TEXT
            );

            CREATE TABLE IF NOT EXISTS patterns (
                pattern_key TEXT PRIMARY KEY,
                pattern TEXT NOT NULL,
                response TEXT NOT NULL,
                frequency INTEGER NOT NULL,
                confidence REAL NOT NULL,
                last_used TEXT NOT NULL,
                pending_feedback INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS stats (
                id INTEGER PRIMARY KEY,
                total_interactions INTEGER NOT NULL,
                positive_feedback INTEGER NOT NULL,
                negative_feedback INTEGER NOT NULL,
                average_rating REAL NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_interactions_timestamp ON interactions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_interactions_intent ON interactions(intent);
        "#,
        )?;

        Ok(())
    }

    /// Number of interactions ever saved (not just the retained window)
    pub async fn interaction_count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM interactions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn load_interactions(conn: &Connection, limit: usize) -> Result<Vec<Interaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            r#"SELECT id, timestamp, user_input, response, intent, context,
                      feedback_rating, feedback_comment, feedback_timestamp
               FROM (
                   SELECT * FROM interactions
                   ORDER BY timestamp DESC, id DESC
                   LIMIT ?1
               )
               ORDER BY timestamp ASC, id ASC"#,
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<i32>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;

        let mut interactions = Vec::new();
        for row in rows {
            let (id, ts, user_input, response, intent, context, rating, comment, fb_ts) = row?;

            let feedback = match (rating, fb_ts) {
                (Some(rating), Some(fb_ts)) => Some(Feedback {
                    rating,
                    comment,
                    timestamp: parse_timestamp(&fb_ts)?,
                }),
                _ => None,
            };

            interactions.push(Interaction {
                timestamp: parse_timestamp(&ts)?,
                context: serde_json::from_str(&context)
                    .with_context(|| format!("Invalid context for interaction {}", id))?,
                id,
                user_input,
                response,
                intent,
                feedback,
            });
        }

        Ok(interactions)
    }

    fn load_patterns(conn: &Connection) -> Result<BTreeMap<String, Pattern>> {
        let mut stmt = conn.prepare(
            "SELECT pattern_key, pattern, response, frequency, confidence, last_used, pending_feedback
             FROM patterns",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?;

        let mut patterns = BTreeMap::new();
        for row in rows {
            let (key, pattern, response, frequency, confidence, last_used, pending) = row?;
            patterns.insert(
                key,
                Pattern {
                    pattern,
                    response,
                    frequency: frequency.max(0) as u64,
                    confidence,
                    last_used: parse_timestamp(&last_used)?,
                    pending_feedback: pending,
                },
            );
        }
        Ok(patterns)
    }

    fn load_stats(conn: &Connection) -> Result<Option<Stats>> {
        let row = conn
            .query_row(
                r#"SELECT total_interactions, positive_feedback, negative_feedback,
                          average_rating, last_updated
                   FROM stats WHERE id = 1"#,
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((total, positive, negative, average, updated)) => Ok(Some(Stats {
                total_interactions: total.max(0) as u64,
                positive_feedback: positive.max(0) as u64,
                negative_feedback: negative.max(0) as u64,
                average_rating: average,
                last_updated: parse_timestamp(&updated)?,
            })),
            None => Ok(None),
        }
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp '{}'", s))?
        .with_timezone(&Utc))
}

impl SqliteStore {
    /// Write a snapshot in one transaction. With `replace_history` the stored
    /// interaction log is dropped first instead of being extended.
    async fn write_snapshot(&self, kb: &KnowledgeBase, replace_history: bool) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        if replace_history {
            let dropped = tx.execute("DELETE FROM interactions", [])?;
            debug!("Dropped {} stored interactions before replacing", dropped);
        }

        for interaction in &kb.interactions {
            let context = serde_json::to_string(&interaction.context)?;
            let feedback = interaction.feedback.as_ref();
            tx.execute(
                r#"INSERT OR REPLACE INTO interactions
                   (id, timestamp, user_input, response, intent, context,
                    feedback_rating, feedback_comment, feedback_timestamp)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
                params![
                    interaction.id,
                    format_timestamp(&interaction.timestamp),
                    interaction.user_input,
                    interaction.response,
                    interaction.intent,
                    context,
                    feedback.map(|f| f.rating),
                    feedback.and_then(|f| f.comment.clone()),
                    feedback.map(|f| format_timestamp(&f.timestamp)),
                ],
            )?;
        }

        // Patterns are always a complete set, unlike the interaction log
        tx.execute("DELETE FROM patterns", [])?;
        for (key, pattern) in &kb.patterns {
            tx.execute(
                r#"INSERT OR REPLACE INTO patterns
                   (pattern_key, pattern, response, frequency, confidence, last_used, pending_feedback)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                params![
                    key,
                    pattern.pattern,
                    pattern.response,
                    pattern.frequency as i64,
                    pattern.confidence,
                    format_timestamp(&pattern.last_used),
                    pattern.pending_feedback,
                ],
            )?;
        }

        tx.execute(
            r#"INSERT OR REPLACE INTO stats
               (id, total_interactions, positive_feedback, negative_feedback, average_rating, last_updated)
               VALUES (1, ?1, ?2, ?3, ?4, ?5)"#,
            params![
                kb.stats.total_interactions as i64,
                kb.stats.positive_feedback as i64,
                kb.stats.negative_feedback as i64,
                kb.stats.average_rating,
                format_timestamp(&kb.stats.last_updated),
            ],
        )?;

        tx.commit()?;
        debug!(
            "Saved {} interactions and {} patterns to {}",
            kb.interactions.len(),
            kb.patterns.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn save(&self, kb: &KnowledgeBase) -> Result<()> {
        self.write_snapshot(kb, false).await
    }

    async fn replace(&self, kb: &KnowledgeBase) -> Result<()> {
        self.write_snapshot(kb, true).await
    }

    async fn load(&self, max_interactions: usize) -> Result<Option<KnowledgeBase>> {
        let conn = self.conn.lock().await;

        let stats = Self::load_stats(&conn)?;
        let patterns = Self::load_patterns(&conn)?;
        let interactions = Self::load_interactions(&conn, max_interactions)?;

        if stats.is_none() && patterns.is_empty() && interactions.is_empty() {
            return Ok(None);
        }

        Ok(Some(KnowledgeBase {
            patterns,
            interactions,
            stats: stats.unwrap_or_default(),
        }))
    }

    async fn backup(&self) -> Result<Option<PathBuf>> {
        if !self.backup_enabled {
            return Ok(None);
        }

        let backup_dir = self
            .path
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| PathBuf::from("backups"));
        tokio::fs::create_dir_all(&backup_dir)
            .await
            .context("Failed to create backup directory")?;

        let target = backup_dir.join(format!("backup_{}.db", backup_stamp()));
        // VACUUM INTO refuses to overwrite
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            tokio::fs::remove_file(&target)
                .await
                .with_context(|| format!("Failed to replace backup {}", target.display()))?;
        }
        let conn = self.conn.lock().await;
        conn.execute("VACUUM INTO ?1", params![target.to_string_lossy().into_owned()])
            .with_context(|| format!("Failed to write backup {}", target.display()))?;

        info!("Backup written to {}", target.display());
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{Interaction, KnowledgeEngine, LearningConfig};
    use tempfile::tempdir;

    fn engine(max: usize) -> KnowledgeEngine {
        KnowledgeEngine::new(LearningConfig {
            max_interactions: max,
            ..LearningConfig::default()
        })
    }

    #[tokio::test]
    async fn test_empty_database_loads_none() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("kb.db"), false).await.unwrap();
        assert!(store.load(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("kb.db"), false).await.unwrap();

        let engine = engine(10);
        let id = engine.record_interaction(
            Interaction::new("hola", "hi", "greeting")
                .with_context("entities", serde_json::json!({"lang": "es"})),
        );
        engine.record_interaction(Interaction::new("bye", "see you", "farewell"));
        engine.add_feedback(&id, 2, Some("too short".to_string())).unwrap();
        let snapshot = engine.snapshot();

        store.save(&snapshot).await.unwrap();
        let loaded = store.load(10).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_history_accumulates_beyond_window() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("kb.db"), false).await.unwrap();
        let engine = engine(2);

        for i in 0..5 {
            engine.record_interaction(Interaction::new(format!("q{}", i), "a", "question"));
            store.save(&engine.snapshot()).await.unwrap();
        }

        assert_eq!(store.interaction_count().await.unwrap(), 5);

        let loaded = store.load(2).await.unwrap().unwrap();
        let inputs: Vec<_> = loaded.interactions.iter().map(|i| i.user_input.as_str()).collect();
        assert_eq!(inputs, vec!["q3", "q4"]);
        assert_eq!(loaded.stats.total_interactions, 5);
        assert_eq!(loaded.patterns["question"].frequency, 5);
    }

    #[tokio::test]
    async fn test_feedback_update_is_persisted() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("kb.db"), false).await.unwrap();
        let engine = engine(10);

        let id = engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        store.save(&engine.snapshot()).await.unwrap();
        engine.add_feedback(&id, 4, None).unwrap();
        store.save(&engine.snapshot()).await.unwrap();

        let loaded = store.load(10).await.unwrap().unwrap();
        assert_eq!(loaded.interactions[0].rating(), Some(4));
        assert_eq!(loaded.interactions[0].feedback.as_ref().unwrap().comment, None);
    }

    #[tokio::test]
    async fn test_patterns_are_replaced_on_save() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("kb.db"), false).await.unwrap();

        let engine = engine(10);
        engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        store.save(&engine.snapshot()).await.unwrap();

        // An imported knowledge base without the greeting pattern
        engine.import(&KnowledgeEngine::default().export().unwrap()).unwrap();
        engine.record_interaction(Interaction::new("bye", "see you", "farewell"));
        store.save(&engine.snapshot()).await.unwrap();

        let loaded = store.load(10).await.unwrap().unwrap();
        assert_eq!(loaded.patterns.keys().collect::<Vec<_>>(), vec!["farewell"]);
    }

    #[tokio::test]
    async fn test_replace_drops_history_from_before_import() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("kb.db"), false).await.unwrap();

        let engine = engine(10);
        for i in 0..3 {
            engine.record_interaction(Interaction::new(format!("old{}", i), "a", "question"));
        }
        store.save(&engine.snapshot()).await.unwrap();

        let fresh = KnowledgeEngine::default();
        fresh.record_interaction(Interaction::new("new", "b", "question"));
        engine.import(&fresh.export().unwrap()).unwrap();
        store.replace(&engine.snapshot()).await.unwrap();

        let loaded = store.load(10).await.unwrap().unwrap();
        assert_eq!(loaded, engine.snapshot());
        assert_eq!(store.interaction_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_feedback_survives_reload() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("kb.db"), false).await.unwrap();

        let original = engine(10);
        let id = original.record_interaction(Interaction::new("hi", "hello", "greeting"));
        original.add_feedback(&id, 5, None).unwrap();
        store.save(&original.snapshot()).await.unwrap();

        let restored = engine(10);
        restored.restore(store.load(10).await.unwrap().unwrap());
        restored.record_interaction(Interaction::new("hey", "hello", "greeting"));
        assert!((restored.patterns()[0].1.confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_back_to_back_backups_succeed() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("kb.db"), true).await.unwrap();
        let engine = engine(10);
        engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        store.save(&engine.snapshot()).await.unwrap();

        let first = store.backup().await.unwrap().expect("backup enabled");
        let second = store.backup().await.unwrap().expect("backup enabled");
        assert!(first.exists());
        assert!(second.exists());
    }

    #[tokio::test]
    async fn test_backup_creates_database_copy() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("kb.db"), true).await.unwrap();
        let engine = engine(10);
        engine.record_interaction(Interaction::new("hi", "hello", "greeting"));
        store.save(&engine.snapshot()).await.unwrap();

        let target = store.backup().await.unwrap().expect("backup enabled");
        assert!(target.exists());

        let copy = SqliteStore::new(&target, false).await.unwrap();
        let loaded = copy.load(10).await.unwrap().unwrap();
        assert_eq!(loaded.patterns.len(), 1);
    }
}

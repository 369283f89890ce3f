//! Configuration management
//!
//! Manages agent configuration: learning parameters, storage backend,
//! local model endpoint, logging and voice input.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::learning::LearningConfig;
use crate::memory::StorageConfig;
use crate::speech::SpeechConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Knowledge engine parameters
    #[serde(default)]
    pub learning: LearningConfig,
    /// Persistence backend
    #[serde(default)]
    pub storage: StorageConfig,
    /// Local language model (Ollama) settings
    #[serde(default)]
    pub model: ModelConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Voice input
    #[serde(default)]
    pub speech: SpeechConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the Ollama server
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    /// Model name as known to Ollama
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens to generate per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature for responses
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f64 {
    0.7
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// debug, info, warn or error (RUST_LOG takes precedence)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional file that log lines are appended to, in addition to stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from a specific file, creating it with defaults if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Reject values the knowledge engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let learning = &self.learning;
        if learning.max_interactions == 0 {
            anyhow::bail!("learning.max_interactions must be greater than 0");
        }
        if !learning.learning_rate.is_finite() || learning.learning_rate < 0.0 {
            anyhow::bail!(
                "learning.learning_rate must be a non-negative number, got {}",
                learning.learning_rate
            );
        }
        if !(0.0..=1.0).contains(&learning.confidence_threshold) {
            anyhow::bail!(
                "learning.confidence_threshold must be within [0, 1], got {}",
                learning.confidence_threshold
            );
        }
        Ok(())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "knowledge-agent", "knowledge-agent")
        .context("Failed to get project directories")
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config(path: &Path) -> Result<()> {
    let config = Config::load_from(path)?;

    println!("Configuration file: {}", path.display());
    println!();
    println!("Learning:");
    println!("  learning_rate:        {}", config.learning.learning_rate);
    println!("  confidence_threshold: {}", config.learning.confidence_threshold);
    println!("  max_interactions:     {}", config.learning.max_interactions);
    println!("  save_interval:        {}s", config.learning.save_interval);
    println!("Storage:");
    println!("  backend:              {}", config.storage.backend);
    println!("  path:                 {}", config.storage.path.display());
    println!(
        "  backups:              {}",
        if config.storage.backup_enabled {
            format!("every {}s", config.storage.backup_interval)
        } else {
            "disabled".to_string()
        }
    );
    println!("Model:");
    println!("  ollama_url:           {}", config.model.ollama_url);
    println!("  model:                {}", config.model.model);
    println!("  max_tokens:           {}", config.model.max_tokens);
    println!("  temperature:          {}", config.model.temperature);
    println!("Logging:");
    println!("  level:                {}", config.logging.level);
    println!(
        "  file:                 {}",
        config
            .logging
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(stderr only)".to_string())
    );
    println!("Speech:");
    if config.speech.enabled {
        println!("  provider:             {}", config.speech.provider);
        println!("  language:             {}", config.speech.language);
    } else {
        println!("  voice input:          disabled");
    }

    Ok(())
}

/// Reset configuration to defaults
pub fn reset_config(path: &Path) -> Result<()> {
    Config::default().save_to(path)?;
    println!("Configuration reset to defaults.");
    Ok(())
}

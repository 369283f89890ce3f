//! Logging setup
//!
//! Installs the global tracing subscriber: stderr always, so command output
//! on stdout stays clean, plus an optional append-only log file.
//! `RUST_LOG` overrides the configured level.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Longest excerpt of user/model text written to the log
const LOG_EXCERPT_CHARS: usize = 200;

/// Map a configured level name to a filter directive (unknown names mean info)
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        "trace" => "trace",
        _ => "info",
    }
}

/// Initialize the global subscriber. Call once, from `main`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&config.level)));

    let file_layer = match config.file.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create log directory")?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

fn excerpt(text: &str) -> String {
    if text.chars().count() > LOG_EXCERPT_CHARS {
        format!("{}...", text.chars().take(LOG_EXCERPT_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Log one conversational exchange
pub fn log_interaction(user_input: &str, response: &str, intent: &str) {
    info!(
        intent,
        "Interaction - input: {} | response: {}",
        excerpt(user_input),
        excerpt(response)
    );
}

/// Log a failed operation with the component it happened in
pub fn log_error(component: &str, operation: &str, err: &dyn std::fmt::Display) {
    error!(component, operation, "{} failed: {:#}", operation, err);
}

pub fn log_startup(version: &str) {
    info!(
        "=== knowledge-agent v{} started - {} ===",
        version,
        chrono::Local::now().to_rfc3339()
    );
}

pub fn log_shutdown() {
    info!("=== knowledge-agent stopped - {} ===", chrono::Local::now().to_rfc3339());
}

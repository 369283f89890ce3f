//! Speech-to-text input
//!
//! Turns recorded audio into chat input with one of two local backends:
//! - `whisper-cpp`: runs the whisper.cpp CLI as a subprocess
//! - `whisper-api`: posts the file to a local Whisper HTTP server (`/transcribe`)
//!
//! Raw audio (encoded bytes or PCM samples) is spooled to a temporary file
//! first, since both backends consume files.

use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Sample rate whisper models expect
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Which transcription backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeechProvider {
    #[default]
    WhisperCpp,
    WhisperApi,
}

impl std::fmt::Display for SpeechProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeechProvider::WhisperCpp => write!(f, "whisper-cpp"),
            SpeechProvider::WhisperApi => write!(f, "whisper-api"),
        }
    }
}

/// Speech configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Offer `/voice` in chat
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: SpeechProvider,
    /// whisper.cpp executable (e.g. `./whisper.cpp/main`)
    #[serde(default)]
    pub whisper_path: Option<PathBuf>,
    /// ggml model file (e.g. `./models/ggml-base.bin`)
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Base URL of the Whisper HTTP server
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Spoken language code passed to the model
    #[serde(default = "default_language")]
    pub language: String,
    /// Upper bound for one transcription
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: SpeechProvider::default(),
            whisper_path: None,
            model_path: None,
            api_url: default_api_url(),
            language: default_language(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiTranscription {
    text: String,
}

/// Speech transcriber
pub struct Transcriber {
    client: Client,
    config: SpeechConfig,
}

impl Transcriber {
    pub fn new(config: SpeechConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn provider(&self) -> SpeechProvider {
        self.config.provider
    }

    /// Transcribe an audio file
    pub async fn transcribe_file(&self, audio_path: &Path) -> Result<String> {
        if !tokio::fs::try_exists(audio_path).await.unwrap_or(false) {
            bail!("Audio file not found: {}", audio_path.display());
        }

        debug!("Transcribing {} with {}", audio_path.display(), self.config.provider);
        let text = match self.config.provider {
            SpeechProvider::WhisperCpp => self.transcribe_with_whisper_cpp(audio_path).await?,
            SpeechProvider::WhisperApi => self.transcribe_with_api(audio_path).await?,
        };
        info!("Transcribed: \"{}\"", text);
        Ok(text)
    }

    /// Transcribe encoded audio held in memory; `format` is the file extension
    pub async fn transcribe_bytes(&self, audio: &[u8], format: &str) -> Result<String> {
        // Removed when dropped, including on the error paths below
        let spool = tempfile::Builder::new()
            .prefix("audio-")
            .suffix(&format!(".{}", format.trim_start_matches('.')))
            .tempfile()
            .context("Failed to create temporary audio file")?;

        tokio::fs::write(spool.path(), audio)
            .await
            .context("Failed to write audio data")?;

        self.transcribe_file(spool.path()).await
    }

    /// Transcribe mono 16-bit PCM samples
    pub async fn transcribe_pcm(&self, samples: &[i16], sample_rate: u32) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_to_wav(samples, sample_rate)?;
        self.transcribe_bytes(&wav, "wav").await
    }

    fn whisper_cpp_args(&self, model_path: &Path, audio_path: &Path) -> Vec<OsString> {
        vec![
            "-m".into(),
            model_path.into(),
            "-f".into(),
            audio_path.into(),
            "-l".into(),
            self.config.language.clone().into(),
            // No timestamps
            "-nt".into(),
        ]
    }

    async fn transcribe_with_whisper_cpp(&self, audio_path: &Path) -> Result<String> {
        let Some(whisper_path) = &self.config.whisper_path else {
            bail!("speech.whisper_path is not set; install whisper.cpp and point it at the binary");
        };
        let Some(model_path) = &self.config.model_path else {
            bail!("speech.model_path is not set; download a Whisper ggml model");
        };

        let child = Command::new(whisper_path)
            .args(self.whisper_cpp_args(model_path, audio_path))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run whisper.cpp at {}", whisper_path.display()))?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Transcription timeout ({}s)", self.config.timeout_secs))?
        .context("Failed to wait for whisper.cpp")?;

        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        if !output.status.success() {
            bail!("whisper.cpp exited with {}: {}", output.status, combined.trim());
        }

        parse_whisper_output(&combined).context("whisper.cpp produced no transcription")
    }

    async fn transcribe_with_api(&self, audio_path: &Path) -> Result<String> {
        let audio = tokio::fs::read(audio_path)
            .await
            .with_context(|| format!("Failed to read {}", audio_path.display()))?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let form = Form::new()
            .part("file", Part::bytes(audio).file_name(file_name))
            .text("language", self.config.language.clone());

        let url = format!("{}/transcribe", self.config.api_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to reach Whisper API at {} (is the server running?)",
                    self.config.api_url
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Whisper API returned error {}: {}", status, body);
        }

        let parsed: ApiTranscription = response
            .json()
            .await
            .context("Failed to decode Whisper API response")?;
        Ok(parsed.text.trim().to_string())
    }
}

/// Pull the transcript out of whisper.cpp console output.
///
/// whisper.cpp interleaves its own diagnostics (`whisper_*` lines and
/// bracketed system info) with the text; those are dropped.
pub fn parse_whisper_output(output: &str) -> Option<String> {
    let text = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('[') && !line.contains("whisper_"))
        .collect::<Vec<_>>()
        .join(" ");

    (!text.is_empty()).then_some(text)
}

/// Encode mono 16-bit PCM as a WAV file in memory
fn pcm_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}

//! Configuration types for the sidecar.
//!
//! All generation knobs are process configuration, not wire parameters: the
//! host contract deliberately exposes no caller-tunable sampling.

use crate::error::{Result, SidecarError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level sidecar configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Text generation settings.
    pub generation: GenerationConfig,
    /// Model download settings.
    pub download: DownloadConfig,
}

/// Generation limits and sampling constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum characters of caller content embedded in a prompt.
    pub max_content_chars: usize,
    /// Maximum new tokens for tag generation.
    pub tags_max_tokens: usize,
    /// Maximum new tokens for summarization.
    pub summary_max_tokens: usize,
    /// Maximum new tokens for a chat turn.
    pub chat_max_tokens: usize,
    /// Maximum new tokens for audio transcription/analysis.
    pub audio_max_tokens: usize,
    /// Chat sampling temperature.
    pub chat_temperature: f64,
    /// Chat nucleus-sampling cumulative probability cutoff.
    pub chat_top_p: f64,
    /// Repetition penalty applied during chat generation.
    ///
    /// Prevents degenerate repeated-token loops in small local models.
    pub chat_repetition_penalty: f32,
    /// Trailing context window (tokens) the repetition penalty considers.
    pub chat_repetition_window: usize,
    /// Maximum number of tags returned by `generate-tags`.
    pub max_tags: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 2000,
            tags_max_tokens: 200,
            summary_max_tokens: 150,
            chat_max_tokens: 512,
            audio_max_tokens: 2000,
            chat_temperature: 0.7,
            chat_top_p: 0.9,
            chat_repetition_penalty: 1.2,
            chat_repetition_window: 64,
            max_tags: 5,
        }
    }
}

/// Model download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Whether to issue HEAD requests for file sizes before downloading.
    ///
    /// Sizes let progress events carry a percentage; without them only
    /// downloaded byte counts are reported.
    pub query_sizes: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self { query_sizes: true }
    }
}

impl SidecarConfig {
    /// Default config path: `<config_dir>/sibyl/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sibyl")
            .join("config.toml")
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| SidecarError::Config(format!("{}: {e}", path.display())))
    }

    /// Load the default config file if present, falling back to defaults.
    pub fn load_or_default() -> Self {
        let path = Self::default_config_path();
        if path.is_file() {
            match Self::from_file(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load config, using defaults");
                }
            }
        }
        Self::default()
    }
}

/// Truncate a string to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

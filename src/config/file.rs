//! TOML configuration file loading
//!
//! Supports `~/.config/supply-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SupplyVoiceConfigFile {
    /// Backend endpoints
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Conversation behaviour
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Debounce, reveal and fade timings
    #[serde(default)]
    pub timing: TimingFileConfig,

    /// Local greeting assets
    #[serde(default)]
    pub greeting: GreetingFileConfig,

    /// Realtime speech-to-text service
    #[serde(default)]
    pub stt: SttFileConfig,
}

/// Backend endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API base URL (e.g. "https://orders.example.com")
    pub api_url: Option<String>,

    /// Explicit duplex channel URL, overrides the one derived from `api_url`
    pub channel_url: Option<String>,

    /// Explicit credential endpoint, overrides the one derived from `api_url`
    pub token_url: Option<String>,
}

/// Conversation configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Language code ("en" or "de")
    pub language: Option<String>,
}

/// Timing configuration, all values in milliseconds except the factor
#[derive(Debug, Default, Deserialize)]
pub struct TimingFileConfig {
    pub silence_ms: Option<u64>,
    pub reveal_min_interval_ms: Option<u64>,
    pub reveal_factor: Option<f64>,
    pub reply_fade_ms: Option<u64>,
    pub text_only_fade_ms: Option<u64>,
    pub greeting_fallback_ms: Option<u64>,
    pub greeting_fade_ms: Option<u64>,
}

/// Greeting asset configuration
#[derive(Debug, Default, Deserialize)]
pub struct GreetingFileConfig {
    /// Directory holding the greeting MP3 files
    pub asset_dir: Option<String>,
    /// English greeting file name
    pub file_en: Option<String>,
    /// German greeting file name
    pub file_de: Option<String>,
}

/// Realtime speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Realtime endpoint (wss)
    pub url: Option<String>,
    /// Model identifier
    pub model_id: Option<String>,
    /// How the service decides an utterance is committed ("vad" or "manual")
    pub commit_strategy: Option<String>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `SupplyVoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SupplyVoiceConfigFile {
    config_file_path().map_or_else(SupplyVoiceConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path
///
/// Missing or unparseable files yield the defaults.
pub fn load_from(path: &Path) -> SupplyVoiceConfigFile {
    if !path.exists() {
        return SupplyVoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SupplyVoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SupplyVoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/supply-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("supply-voice").join("config.toml"))
}

//! Configuration management for the voice ordering client
//!
//! Values are layered env > TOML file > defaults. CLI flags sit on top of
//! all three through [`LoadOptions`].

pub mod file;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::transcription::AudioConstraints;
use crate::{Error, Result};

use file::SupplyVoiceConfigFile;

/// Default API base when nothing is configured
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Path of the duplex channel relative to the API base
const CHANNEL_PATH: &str = "api/v1/websocket/";

/// Path of the credential endpoint relative to the API base
const TOKEN_PATH: &str = "api/v1/elevenlabs-token/";

/// Default realtime speech-to-text endpoint
const DEFAULT_STT_URL: &str = "wss://api.elevenlabs.io/v1/speech-to-text/realtime";

/// Default realtime speech-to-text model
const DEFAULT_STT_MODEL: &str = "scribe_v2_realtime";

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API base URL
    pub api_url: Url,

    /// Duplex channel URL (ws/wss)
    pub channel_url: Url,

    /// Credential endpoint URL
    pub token_url: Url,

    /// Conversation language
    pub language: Language,

    /// Debounce, reveal and fade timings
    pub timing: TimingConfig,

    /// Local greeting assets
    pub greeting: GreetingConfig,

    /// Realtime speech-to-text service
    pub stt: SttConfig,
}

/// Conversation language
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    English,
    German,
}

impl Language {
    /// Language code sent to the backend and the transcription service
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::German => "de",
        }
    }

    /// Text spoken by the local greeting asset
    #[must_use]
    pub const fn greeting_text(self) -> &'static str {
        match self {
            Self::English => "Hi, I can help you put together a quick supply order for the site.",
            Self::German => {
                "Hallo, ich kann dir helfen, eine schnelle Materialbestellung für die Baustelle zusammenzustellen."
            }
        }
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "en" | "english" => Ok(Self::English),
            "de" | "german" | "deutsch" => Ok(Self::German),
            other => Err(Error::Config(format!("unsupported language: {other}"))),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Conversation timings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingConfig {
    /// Silence after the last changed partial before a turn is committed
    pub silence: Duration,

    /// Floor for the word reveal cadence
    pub reveal_min_interval: Duration,

    /// Fraction of the audio duration the reveal is spread over
    pub reveal_factor: f64,

    /// Reply fade after audio playback ends
    pub reply_fade: Duration,

    /// Reply fade when a reply arrived without audio
    pub text_only_fade: Duration,

    /// Pause on the greeting text when the greeting audio cannot play
    pub greeting_fallback: Duration,

    /// Greeting fade once listening starts
    pub greeting_fade: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            silence: Duration::from_millis(1500),
            reveal_min_interval: Duration::from_millis(50),
            reveal_factor: 0.9,
            reply_fade: Duration::from_millis(1000),
            text_only_fade: Duration::from_millis(3000),
            greeting_fallback: Duration::from_millis(1500),
            greeting_fade: Duration::from_millis(4000),
        }
    }
}

/// Local greeting assets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetingConfig {
    /// Directory holding the greeting files
    pub asset_dir: PathBuf,

    /// English greeting file name
    pub file_en: String,

    /// German greeting file name
    pub file_de: String,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("assets"),
            file_en: "greeting.mp3".to_string(),
            file_de: "greeting_de.mp3".to_string(),
        }
    }
}

impl GreetingConfig {
    /// Greeting audio file for a language
    #[must_use]
    pub fn audio_path(&self, language: Language) -> PathBuf {
        let name = match language {
            Language::English => &self.file_en,
            Language::German => &self.file_de,
        };
        self.asset_dir.join(name)
    }
}

/// Realtime speech-to-text configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SttConfig {
    /// Realtime endpoint
    pub url: Url,

    /// Model identifier
    pub model_id: String,

    /// Commit strategy requested from the service ("vad" or "manual")
    pub commit_strategy: String,

    /// Microphone processing
    pub constraints: AudioConstraints,
}

/// Overrides applied on top of env, file and defaults (CLI flags)
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Language code override
    pub language: Option<String>,

    /// API base URL override
    pub api_url: Option<String>,

    /// Config file path override
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from env, the standard config file and defaults
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL or language is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(&LoadOptions::default())
    }

    /// Load configuration with CLI overrides
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL or language is invalid
    pub fn load_with_options(options: &LoadOptions) -> Result<Self> {
        let fc = options
            .config_path
            .as_deref()
            .map_or_else(file::load_config_file, file::load_from);

        Self::from_sources(fc, &|key| std::env::var(key).ok(), options)
    }

    /// Resolve configuration from explicit sources
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL or language is invalid
    pub fn from_sources(
        fc: SupplyVoiceConfigFile,
        env: &dyn Fn(&str) -> Option<String>,
        options: &LoadOptions,
    ) -> Result<Self> {
        // CLI > env > toml > default
        let api_url = options
            .api_url
            .clone()
            .or_else(|| env("SUPPLY_VOICE_API_URL"))
            .or(fc.server.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(&api_url)
            .map_err(|e| Error::Config(format!("invalid API URL {api_url}: {e}")))?;

        let language = options
            .language
            .clone()
            .or_else(|| env("SUPPLY_VOICE_LANGUAGE"))
            .or(fc.conversation.language)
            .map_or(Ok(Language::default()), |code| code.parse())?;

        let channel_url = match env("SUPPLY_VOICE_CHANNEL_URL").or(fc.server.channel_url) {
            Some(url) => Url::parse(&url)
                .map_err(|e| Error::Config(format!("invalid channel URL {url}: {e}")))?,
            None => channel_url_for(&api_url, language)?,
        };

        let token_url = match env("SUPPLY_VOICE_TOKEN_URL").or(fc.server.token_url) {
            Some(url) => Url::parse(&url)
                .map_err(|e| Error::Config(format!("invalid token URL {url}: {e}")))?,
            None => api_endpoint(&api_url, TOKEN_PATH)?,
        };

        let timing = {
            let default = TimingConfig::default();
            let t = &fc.timing;
            let ms = |value: Option<u64>, fallback: Duration| {
                value.map_or(fallback, Duration::from_millis)
            };
            let reveal_factor = t.reveal_factor.unwrap_or(default.reveal_factor);
            if !(reveal_factor > 0.0 && reveal_factor <= 1.0) {
                return Err(Error::Config(format!(
                    "reveal_factor must be in (0, 1], got {reveal_factor}"
                )));
            }
            TimingConfig {
                silence: env("SUPPLY_VOICE_SILENCE_MS")
                    .and_then(|s| s.parse().ok())
                    .map_or_else(|| ms(t.silence_ms, default.silence), Duration::from_millis),
                reveal_min_interval: ms(t.reveal_min_interval_ms, default.reveal_min_interval),
                reveal_factor,
                reply_fade: ms(t.reply_fade_ms, default.reply_fade),
                text_only_fade: ms(t.text_only_fade_ms, default.text_only_fade),
                greeting_fallback: ms(t.greeting_fallback_ms, default.greeting_fallback),
                greeting_fade: ms(t.greeting_fade_ms, default.greeting_fade),
            }
        };

        let greeting = {
            let default = GreetingConfig::default();
            GreetingConfig {
                asset_dir: env("SUPPLY_VOICE_GREETING_DIR")
                    .or(fc.greeting.asset_dir)
                    .map_or(default.asset_dir, PathBuf::from),
                file_en: fc.greeting.file_en.unwrap_or(default.file_en),
                file_de: fc.greeting.file_de.unwrap_or(default.file_de),
            }
        };

        let stt = {
            let url = env("SUPPLY_VOICE_STT_URL")
                .or(fc.stt.url)
                .unwrap_or_else(|| DEFAULT_STT_URL.to_string());
            let default_constraints = AudioConstraints::default();
            SttConfig {
                url: Url::parse(&url)
                    .map_err(|e| Error::Config(format!("invalid STT URL {url}: {e}")))?,
                model_id: fc
                    .stt
                    .model_id
                    .unwrap_or_else(|| DEFAULT_STT_MODEL.to_string()),
                commit_strategy: fc.stt.commit_strategy.unwrap_or_else(|| "vad".to_string()),
                constraints: AudioConstraints {
                    echo_cancellation: fc
                        .stt
                        .echo_cancellation
                        .unwrap_or(default_constraints.echo_cancellation),
                    noise_suppression: fc
                        .stt
                        .noise_suppression
                        .unwrap_or(default_constraints.noise_suppression),
                    auto_gain_control: fc
                        .stt
                        .auto_gain_control
                        .unwrap_or(default_constraints.auto_gain_control),
                },
            }
        };

        tracing::debug!(
            api_url = %api_url,
            channel_url = %channel_url,
            language = %language,
            "configuration resolved"
        );

        Ok(Self {
            api_url,
            channel_url,
            token_url,
            language,
            timing,
            greeting,
            stt,
        })
    }
}

/// Resolve `path` below the API base, keeping any prefix the base carries
fn api_endpoint(api_url: &Url, path: &str) -> Result<Url> {
    let mut base = api_url.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    Ok(base.join(path)?)
}

/// Derive the duplex channel URL from the API base
///
/// `http` maps to `ws`, `https` to `wss`; the language travels as a query
/// parameter.
///
/// # Errors
///
/// Returns error if the API base uses a scheme other than http(s)/ws(s)
pub fn channel_url_for(api_url: &Url, language: Language) -> Result<Url> {
    let scheme = match api_url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::Config(format!(
                "cannot derive channel URL from scheme {other}"
            )));
        }
    };

    let mut url = api_endpoint(api_url, CHANNEL_PATH)?;
    url.set_scheme(scheme)
        .map_err(|()| Error::Config(format!("cannot switch {api_url} to {scheme}")))?;
    url.set_query(Some(&format!("language={}", language.code())));
    Ok(url)
}

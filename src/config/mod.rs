//! Configuration management for Intervox
//!
//! Values are layered: defaults, then the TOML file, then environment
//! variables. CLI flags are applied on top by the binary.

pub mod file;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::Result;
use file::IntervoxConfigFile;

/// Default interview API base URL
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

/// Intervox configuration
#[derive(Debug)]
pub struct Config {
    /// Session service configuration
    pub api: ApiConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// `OpenAI` API key (for Whisper and TTS)
    pub openai_key: Option<Arc<SecretString>>,
}

/// Session service configuration
#[derive(Debug)]
pub struct ApiConfig {
    /// Base URL; endpoints are resolved relative to it
    pub url: String,

    /// Bearer token, if the service requires one
    pub token: Option<SecretString>,

    /// Per-request timeout
    pub request_timeout: Duration,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable voice input/output
    pub enabled: bool,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f64,

    /// Recognition language
    pub language: String,

    /// How long one listen operation waits for speech
    pub recognition_window: Duration,

    /// Pause before the opening message is spoken
    pub intro_delay: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            language: "en".to_string(),
            recognition_window: Duration::from_secs(8),
            intro_delay: Duration::from_millis(1500),
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded
    pub fn load(path: Option<&Path>, disable_voice: bool) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        let mut config = Self::from_sources(fc, |key| std::env::var(key).ok());

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
            config.voice.enabled = false;
        }

        Ok(config)
    }

    /// Merge a parsed config file with an environment lookup (env > toml > default)
    #[must_use]
    pub fn from_sources(fc: IntervoxConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = VoiceConfig::default();

        let api = ApiConfig {
            url: env("INTERVOX_API_URL")
                .or(fc.server.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            token: env("INTERVOX_TOKEN")
                .or(fc.server.token)
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            request_timeout: Duration::from_secs(fc.server.request_timeout_secs.unwrap_or(60)),
        };

        let disabled_by_env = env("INTERVOX_DISABLE_VOICE")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let voice = VoiceConfig {
            enabled: !disabled_by_env && fc.voice.enabled.unwrap_or(defaults.enabled),
            stt_model: env("INTERVOX_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(defaults.stt_model),
            tts_model: env("INTERVOX_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: fc.voice.tts_voice.unwrap_or(defaults.tts_voice),
            tts_speed: fc
                .voice
                .tts_speed
                .map_or(defaults.tts_speed, |s| s.clamp(0.25, 4.0)),
            language: fc.voice.language.unwrap_or(defaults.language),
            recognition_window: fc
                .voice
                .recognition_timeout_secs
                .map_or(defaults.recognition_window, Duration::from_secs),
            intro_delay: fc
                .voice
                .intro_delay_ms
                .map_or(defaults.intro_delay, Duration::from_millis),
        };

        let openai_key = env("OPENAI_API_KEY")
            .or(fc.api_keys.openai)
            .filter(|k| !k.is_empty())
            .map(|k| Arc::new(SecretString::from(k)));

        Self {
            api,
            voice,
            openai_key,
        }
    }

    /// Whether speech can actually be used
    #[must_use]
    pub const fn voice_available(&self) -> bool {
        self.voice.enabled && self.openai_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(IntervoxConfigFile::default(), env_from(&[]));

        assert_eq!(config.api.url, DEFAULT_API_URL);
        assert!(config.api.token.is_none());
        assert_eq!(config.api.request_timeout, Duration::from_secs(60));
        assert!(config.voice.enabled);
        assert_eq!(config.voice.stt_model, "whisper-1");
        assert_eq!(config.voice.recognition_window, Duration::from_secs(8));
        assert_eq!(config.voice.intro_delay, Duration::from_millis(1500));
        assert!(!config.voice_available());
    }

    #[test]
    fn env_overrides_file() {
        let fc: IntervoxConfigFile = toml::from_str(
            r#"
            [server]
            api_url = "http://file.test/api/v1"
            token = "file-token"

            [voice]
            stt_model = "whisper-file"
            tts_speed = 9.0

            [api_keys]
            openai = "sk-file"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env_from(&[
                ("INTERVOX_API_URL", "http://env.test/api/v1"),
                ("OPENAI_API_KEY", "sk-env"),
            ]),
        );

        assert_eq!(config.api.url, "http://env.test/api/v1");
        assert_eq!(
            config.api.token.as_ref().map(ExposeSecret::expose_secret),
            Some("file-token")
        );
        assert_eq!(config.voice.stt_model, "whisper-file");
        assert!((config.voice.tts_speed - 4.0).abs() < f64::EPSILON);
        assert_eq!(
            config.openai_key.as_deref().map(ExposeSecret::expose_secret),
            Some("sk-env")
        );
        assert!(config.voice_available());
    }

    #[test]
    fn env_can_disable_voice() {
        let config = Config::from_sources(
            IntervoxConfigFile::default(),
            env_from(&[("INTERVOX_DISABLE_VOICE", "true"), ("OPENAI_API_KEY", "sk")]),
        );
        assert!(!config.voice.enabled);
        assert!(!config.voice_available());
    }

    #[test]
    fn empty_secrets_are_treated_as_unset() {
        let config = Config::from_sources(
            IntervoxConfigFile::default(),
            env_from(&[("INTERVOX_TOKEN", ""), ("OPENAI_API_KEY", "")]),
        );
        assert!(config.api.token.is_none());
        assert!(config.openai_key.is_none());
    }
}

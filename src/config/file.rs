//! TOML configuration file loading
//!
//! Supports `~/.config/intervox/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct IntervoxConfigFile {
    /// Session service configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Session service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Base URL of the interview API (e.g. `http://localhost:8000/api/v1`)
    pub api_url: Option<String>,

    /// Bearer token for the interview API
    pub token: Option<String>,

    /// Per-request timeout
    pub request_timeout_secs: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable voice input/output
    pub enabled: Option<bool>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,

    /// Recognition language (ISO-639-1)
    pub language: Option<String>,

    /// How long a listen operation waits for speech
    pub recognition_timeout_secs: Option<u64>,

    /// Pause before the opening message is spoken
    pub intro_delay_ms: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file
///
/// With an explicit `path`, a missing or malformed file is an error. The
/// standard path is optional and falls back to defaults with a warning.
///
/// # Errors
///
/// Returns error if an explicitly requested file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<IntervoxConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(IntervoxConfigFile::default());
    };

    if !path.exists() {
        return Ok(IntervoxConfigFile::default());
    }

    let config = match std::fs::read_to_string(&path) {
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
                IntervoxConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            IntervoxConfigFile::default()
        }
    };
    Ok(config)
}

/// Return the config file path: `~/.config/intervox/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "intervox").map(|d| d.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_file_leaves_rest_unset() {
        let config: IntervoxConfigFile = toml::from_str(
            r#"
            [voice]
            tts_voice = "nova"
            "#,
        )
        .unwrap();

        assert_eq!(config.voice.tts_voice.as_deref(), Some("nova"));
        assert!(config.voice.enabled.is_none());
        assert!(config.server.api_url.is_none());
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn explicit_path_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\napi_url = \"http://interview.test/api/v1\"\nrequest_timeout_secs = 5"
        )
        .unwrap();

        let config = load_config_file(Some(file.path())).unwrap();
        assert_eq!(
            config.server.api_url.as_deref(),
            Some("http://interview.test/api/v1")
        );
        assert_eq!(config.server.request_timeout_secs, Some(5));
    }

    #[test]
    fn explicit_path_must_exist_and_parse() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_config_file(Some(&missing)),
            Err(Error::Config(_))
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[voice\nenabled = ").unwrap();
        assert!(matches!(load_config_file(Some(&broken)), Err(Error::Toml(_))));
    }
}

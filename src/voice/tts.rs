//! Text-to-speech (TTS) processing

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;

use super::{EventSink, OpToken, Synthesizer, VoiceEvent, play_mp3_blocking};
use crate::error::AdapterError;
use crate::{Error, Result};

const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

struct SpeechSettings {
    client: reqwest::Client,
    api_key: Arc<SecretString>,
    model: String,
    voice: String,
    speed: f64,
}

struct InFlight {
    task: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

/// Speaks through OpenAI TTS and the default output device
pub struct SpeakerSynthesizer {
    settings: Arc<SpeechSettings>,
    in_flight: Option<InFlight>,
}

impl SpeakerSynthesizer {
    /// Create a new synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: Arc<SecretString>,
        model: String,
        voice: String,
        speed: f64,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            settings: Arc::new(SpeechSettings {
                client: reqwest::Client::new(),
                api_key,
                model,
                voice,
                speed,
            }),
            in_flight: None,
        })
    }

    /// Synthesize `text` to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails
    pub async fn synthesize(&self, text: &str) -> std::result::Result<Vec<u8>, AdapterError> {
        synthesize(&self.settings, text).await
    }
}

impl Synthesizer for SpeakerSynthesizer {
    fn speak(
        &mut self,
        token: OpToken,
        text: &str,
        sink: EventSink,
    ) -> std::result::Result<(), AdapterError> {
        self.cancel_all();

        let cancel = Arc::new(AtomicBool::new(false));
        let settings = Arc::clone(&self.settings);
        let text = text.to_string();
        let flag = Arc::clone(&cancel);

        tracing::debug!(%token, chars = text.len(), "speaking");
        let task = tokio::spawn(async move {
            let audio = match synthesize(&settings, &text).await {
                Ok(audio) => audio,
                Err(error) => {
                    sink.emit(VoiceEvent::SpeechFailed { token, error });
                    return;
                }
            };

            if flag.load(Ordering::Acquire) {
                return;
            }
            sink.emit(VoiceEvent::SpeechStarted { token });

            let playing = Arc::clone(&flag);
            let played =
                tokio::task::spawn_blocking(move || play_mp3_blocking(&audio, &playing)).await;

            if flag.load(Ordering::Acquire) {
                return;
            }
            match played {
                Ok(Ok(())) => sink.emit(VoiceEvent::SpeechFinished { token }),
                Ok(Err(error)) => sink.emit(VoiceEvent::SpeechFailed { token, error }),
                Err(e) => sink.emit(VoiceEvent::SpeechFailed {
                    token,
                    error: AdapterError::SynthesisError(e.to_string()),
                }),
            }
        });

        self.in_flight = Some(InFlight { task, cancel });
        Ok(())
    }

    fn cancel_all(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            // The flag stops the playing thread; abort only reaches the async part
            in_flight.cancel.store(true, Ordering::Release);
            in_flight.task.abort();
            tracing::debug!("speech cancelled");
        }
    }
}

impl Drop for SpeakerSynthesizer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Synthesize using OpenAI TTS
async fn synthesize(
    settings: &SpeechSettings,
    text: &str,
) -> std::result::Result<Vec<u8>, AdapterError> {
    #[derive(serde::Serialize)]
    struct TtsRequest<'a> {
        model: &'a str,
        input: &'a str,
        voice: &'a str,
        speed: f64,
    }

    let request = TtsRequest {
        model: &settings.model,
        input: text,
        voice: &settings.voice,
        speed: settings.speed,
    };

    let response = settings
        .client
        .post(SPEECH_URL)
        .bearer_auth(settings.api_key.expose_secret())
        .json(&request)
        .send()
        .await
        .map_err(|e| AdapterError::SynthesisError(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::SynthesisError(format!(
            "OpenAI TTS error {status}: {body}"
        )));
    }

    let audio = response
        .bytes()
        .await
        .map_err(|e| AdapterError::SynthesisError(e.to_string()))?;
    Ok(audio.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        let result = SpeakerSynthesizer::new(
            Arc::new(SecretString::from(String::new())),
            "tts-1".to_string(),
            "alloy".to_string(),
            1.0,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn cancel_when_silent_is_noop() {
        let mut synth = SpeakerSynthesizer::new(
            Arc::new(SecretString::from("sk-test".to_string())),
            "tts-1".to_string(),
            "alloy".to_string(),
            1.0,
        )
        .unwrap();
        synth.cancel_all();
        synth.cancel_all();
        assert!(synth.in_flight.is_none());
    }
}

//! Speech-to-text (STT) processing
//!
//! One listen operation watches the capture tap for a single utterance, then
//! sends it to the Whisper transcription API.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;

use super::{
    EventSink, OpToken, Recognizer, SAMPLE_RATE, StreamHandle, UtteranceDetector,
    UtteranceProgress, VoiceEvent, samples_to_wav,
};
use crate::error::AdapterError;
use crate::{Error, Result};

/// How often the capture tap is drained
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Recognizes one utterance per listen operation via OpenAI Whisper
pub struct WhisperRecognizer {
    request: Arc<TranscribeRequest>,
    active: Option<JoinHandle<()>>,
}

impl WhisperRecognizer {
    /// Create a new recognizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: Arc<SecretString>, model: String, language: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            request: Arc::new(TranscribeRequest {
                client: reqwest::Client::new(),
                api_key,
                model,
                language,
            }),
            active: None,
        })
    }
}

impl Recognizer for WhisperRecognizer {
    fn start_listening(
        &mut self,
        token: OpToken,
        stream: &StreamHandle,
        sink: EventSink,
    ) -> std::result::Result<(), AdapterError> {
        self.stop_listening();

        if stream.tap().is_none() {
            return Err(AdapterError::DeviceUnavailable(
                "capture stream exposes no audio".to_string(),
            ));
        }

        // Anything captured while the agent was talking is not part of the answer
        stream.clear();
        let stream = stream.clone();
        let request = Arc::clone(&self.request);

        tracing::debug!(%token, "listening");
        self.active = Some(tokio::spawn(listen_once(token, stream, sink, request)));
        Ok(())
    }

    fn stop_listening(&mut self) {
        if let Some(task) = self.active.take() {
            task.abort();
            tracing::debug!("listening stopped");
        }
    }
}

impl Drop for WhisperRecognizer {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

struct TranscribeRequest {
    client: reqwest::Client,
    api_key: Arc<SecretString>,
    model: String,
    language: String,
}

async fn listen_once(
    token: OpToken,
    stream: StreamHandle,
    sink: EventSink,
    request: Arc<TranscribeRequest>,
) {
    let mut detector = UtteranceDetector::new();
    let mut interval = tokio::time::interval(POLL_INTERVAL);

    let utterance = loop {
        interval.tick().await;
        match detector.process(&stream.take_samples()) {
            UtteranceProgress::SpeechStarted => sink.emit(VoiceEvent::Partial {
                token,
                text: String::new(),
            }),
            UtteranceProgress::Complete => break detector.take_utterance(),
            UtteranceProgress::Waiting | UtteranceProgress::Continuing => {}
        }
    };

    match transcribe(&request, &utterance).await {
        Ok(text) => sink.emit(VoiceEvent::Final { token, text }),
        Err(error) => {
            sink.emit(VoiceEvent::ListenFailed { token, error });
            return;
        }
    }

    sink.emit(VoiceEvent::ListenEnded { token });
}

/// Transcribe using OpenAI Whisper
async fn transcribe(
    request: &TranscribeRequest,
    samples: &[f32],
) -> std::result::Result<String, AdapterError> {
    let audio = samples_to_wav(samples, SAMPLE_RATE)
        .map_err(|e| AdapterError::RecognitionFailed(e.to_string()))?;
    tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(audio)
                .file_name("audio.wav")
                .mime_str("audio/wav")
                .map_err(|e| AdapterError::RecognitionFailed(e.to_string()))?,
        )
        .text("model", request.model.clone())
        .text("language", request.language.clone());

    let response = request
        .client
        .post(WHISPER_URL)
        .bearer_auth(request.api_key.expose_secret())
        .multipart(form)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Whisper request failed");
            AdapterError::RecognitionFailed(e.to_string())
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, "Whisper API error");
        return Err(AdapterError::RecognitionFailed(format!(
            "Whisper API error {status}: {body}"
        )));
    }

    let result: WhisperResponse = response
        .json()
        .await
        .map_err(|e| AdapterError::RecognitionFailed(e.to_string()))?;

    tracing::info!(transcript = %result.text, "transcription complete");
    Ok(result.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        let result = WhisperRecognizer::new(
            Arc::new(SecretString::from(String::new())),
            "whisper-1".to_string(),
            "en".to_string(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn stream_without_tap_cannot_listen() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut recognizer = WhisperRecognizer::new(
            Arc::new(SecretString::from("sk-test".to_string())),
            "whisper-1".to_string(),
            "en".to_string(),
        )
        .unwrap();

        let result = recognizer.start_listening(
            OpToken::default(),
            &StreamHandle::new(1),
            EventSink::new(tx),
        );
        assert!(matches!(result, Err(AdapterError::DeviceUnavailable(_))));
    }
}

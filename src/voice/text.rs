//! Adapters for sessions without voice
//!
//! Used when voice is disabled in config, when no OpenAI key is available, and
//! as the tail of a permanent downgrade.

use super::{Capture, EventSink, OpToken, Recognizer, StreamHandle, Synthesizer, VoiceEvent};
use crate::error::AdapterError;

/// Capture that never opens a device
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCapture;

impl Capture for DisabledCapture {
    fn start_capture(&mut self, _sink: EventSink) -> Result<StreamHandle, AdapterError> {
        Err(AdapterError::PermissionDenied(
            "voice input disabled".to_string(),
        ))
    }

    fn stop_capture(&mut self, _handle: StreamHandle) {}
}

/// Recognizer for platforms without speech recognition
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedRecognizer;

impl Recognizer for UnsupportedRecognizer {
    fn start_listening(
        &mut self,
        _token: OpToken,
        _stream: &StreamHandle,
        _sink: EventSink,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::RecognitionUnsupported(
            "no speech recognizer configured".to_string(),
        ))
    }

    fn stop_listening(&mut self) {}
}

/// Synthesizer that only reports; the text itself is shown by the UI
#[derive(Debug, Default, Clone, Copy)]
pub struct TextOnlySynthesizer;

impl Synthesizer for TextOnlySynthesizer {
    fn speak(&mut self, token: OpToken, text: &str, sink: EventSink) -> Result<(), AdapterError> {
        tracing::trace!(%token, chars = text.len(), "text-only speak");
        sink.emit(VoiceEvent::SpeechStarted { token });
        sink.emit(VoiceEvent::SpeechFinished { token });
        Ok(())
    }

    fn cancel_all(&mut self) {}
}

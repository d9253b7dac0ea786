//! Voice capabilities
//!
//! Capture, recognition and synthesis sit behind narrow traits so the
//! orchestrator never touches a device or a speech API directly. Adapters
//! report progress by posting [`VoiceEvent`]s through an [`EventSink`], each
//! tagged with the [`OpToken`] of the operation that produced it. Events from
//! a superseded operation are discarded by the receiver.

mod capture;
mod playback;
mod stt;
mod text;
mod tts;
mod utterance;

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::AdapterError;
use crate::orchestrator::Event;

pub use capture::{AudioCapture, MAX_BUFFERED_SAMPLES, SAMPLE_RATE, samples_to_wav};
pub use playback::{play_mp3_blocking, play_samples_blocking};
pub use stt::WhisperRecognizer;
pub use text::{DisabledCapture, TextOnlySynthesizer, UnsupportedRecognizer};
pub use tts::SpeakerSynthesizer;
pub use utterance::{UtteranceDetector, UtteranceProgress, calculate_energy};

/// Identifies one listen or speak operation
///
/// Tokens only ever grow; an event is acted on only when its token equals the
/// orchestrator's current one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpToken(u64);

impl OpToken {
    /// The token following this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw counter value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Shared sample buffer filled by a capture stream
pub type AudioTap = Arc<Mutex<Vec<f32>>>;

/// Handle to an active capture stream
///
/// Owned by the session controller; recognizers only borrow it for the
/// duration of a listen operation and may clone the audio tap from it.
#[derive(Clone)]
pub struct StreamHandle {
    id: u64,
    tap: Option<AudioTap>,
}

impl StreamHandle {
    /// Handle without audio access (used by adapters that capture elsewhere)
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self { id, tap: None }
    }

    /// Handle exposing the captured samples
    #[must_use]
    pub const fn with_tap(id: u64, tap: AudioTap) -> Self {
        Self { id, tap: Some(tap) }
    }

    /// Stream identifier
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Audio buffer, if this stream exposes one
    #[must_use]
    pub const fn tap(&self) -> Option<&AudioTap> {
        self.tap.as_ref()
    }

    /// Take captured samples, clearing the buffer
    #[must_use]
    pub fn take_samples(&self) -> Vec<f32> {
        self.tap
            .as_ref()
            .and_then(|tap| tap.lock().ok().map(|mut buf| std::mem::take(&mut *buf)))
            .unwrap_or_default()
    }

    /// Copy captured samples without clearing
    #[must_use]
    pub fn peek_samples(&self) -> Vec<f32> {
        self.tap
            .as_ref()
            .and_then(|tap| tap.lock().ok().map(|buf| buf.clone()))
            .unwrap_or_default()
    }

    /// Drop buffered samples
    pub fn clear(&self) {
        if let Some(Ok(mut buf)) = self.tap.as_ref().map(|tap| tap.lock()) {
            buf.clear();
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("tap", &self.tap.is_some())
            .finish()
    }
}

/// Progress reported by an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Speech heard, recognition in progress (text may be empty)
    Partial {
        /// Operation that produced the event
        token: OpToken,
        /// Interim transcript, if the adapter provides one
        text: String,
    },
    /// Recognition produced its single final result
    Final {
        /// Operation that produced the event
        token: OpToken,
        /// Recognized text
        text: String,
    },
    /// Recognition failed
    ListenFailed {
        /// Operation that produced the event
        token: OpToken,
        /// Failure reason
        error: AdapterError,
    },
    /// Recognition operation is over (after a result or not)
    ListenEnded {
        /// Operation that produced the event
        token: OpToken,
    },
    /// Audio output began
    SpeechStarted {
        /// Operation that produced the event
        token: OpToken,
    },
    /// Audio output completed
    SpeechFinished {
        /// Operation that produced the event
        token: OpToken,
    },
    /// Synthesis or playback failed
    SpeechFailed {
        /// Operation that produced the event
        token: OpToken,
        /// Failure reason
        error: AdapterError,
    },
    /// The capture stream died underneath the session
    CaptureLost {
        /// Failure reason
        error: AdapterError,
    },
}

impl VoiceEvent {
    /// Token of the operation this event belongs to
    #[must_use]
    pub const fn token(&self) -> Option<OpToken> {
        match self {
            Self::Partial { token, .. }
            | Self::Final { token, .. }
            | Self::ListenFailed { token, .. }
            | Self::ListenEnded { token }
            | Self::SpeechStarted { token }
            | Self::SpeechFinished { token }
            | Self::SpeechFailed { token, .. } => Some(*token),
            Self::CaptureLost { .. } => None,
        }
    }
}

/// Where adapters post their events
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    /// Wrap the session's event queue
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Post an event; silently dropped once the session is gone
    pub fn emit(&self, event: VoiceEvent) {
        if self.tx.send(Event::Voice(event)).is_err() {
            tracing::trace!("event queue closed, dropping voice event");
        }
    }
}

/// Acquires and releases the microphone (and camera) stream
pub trait Capture {
    /// Open the device and start streaming
    ///
    /// A stream that dies later is reported once as `CaptureLost` on `sink`.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` or `DeviceUnavailable`
    fn start_capture(&mut self, sink: EventSink) -> Result<StreamHandle, AdapterError>;

    /// Release the device; stopping an already stopped stream is a no-op
    fn stop_capture(&mut self, handle: StreamHandle);
}

/// Single-shot speech recognition
///
/// Each `start_listening` call yields at most one `Final` and always ends with
/// `ListenEnded` or `ListenFailed`, unless stopped first.
pub trait Recognizer {
    /// Begin recognizing one utterance from `stream`
    ///
    /// # Errors
    ///
    /// Returns an error if recognition cannot start at all
    fn start_listening(
        &mut self,
        token: OpToken,
        stream: &StreamHandle,
        sink: EventSink,
    ) -> Result<(), AdapterError>;

    /// Abort the current recognition; a no-op when idle
    fn stop_listening(&mut self);
}

/// Text-to-speech output
pub trait Synthesizer {
    /// Speak `text`, reporting `SpeechStarted` and then `SpeechFinished` or `SpeechFailed`
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis cannot start at all
    fn speak(&mut self, token: OpToken, text: &str, sink: EventSink) -> Result<(), AdapterError>;

    /// Stop any utterance in flight; a no-op when silent
    fn cancel_all(&mut self);
}

/// The capability set a session runs with
pub struct Capabilities {
    /// Microphone/camera access
    pub capture: Box<dyn Capture>,
    /// Speech-to-text
    pub recognizer: Box<dyn Recognizer>,
    /// Text-to-speech
    pub synthesizer: Box<dyn Synthesizer>,
}

impl Capabilities {
    /// Typed input and printed replies only
    #[must_use]
    pub fn text_only() -> Self {
        Self {
            capture: Box::new(DisabledCapture),
            recognizer: Box::new(UnsupportedRecognizer),
            synthesizer: Box::new(TextOnlySynthesizer),
        }
    }
}

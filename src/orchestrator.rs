//! Turn-taking orchestrator
//!
//! Owns the conversational state machine:
//!
//! ```text
//!            ┌──────────── synthesis ends, capture active ─────────────┐
//!            ▼                                                         │
//!  Idle ─▶ Listening ─▶ Recognizing ─▶ AwaitingReply ─▶ Speaking ──────┘
//!   ▲          │             │               │              │
//!   └──────────┴─ adapter ───┴── transport ──┴── adapter ───┘
//!                 error            error          error
//! ```
//!
//! Any state moves to `Ended` on explicit end. Every listen or speak
//! operation gets a fresh [`OpToken`]; adapter callbacks, transport replies
//! and timers carrying an older token are dropped, so a late result can never
//! resurrect a cancelled operation.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AdapterError, TransportError};
use crate::transcript::{Speaker, Transcript};
use crate::transport::{Reply, SessionId, SessionTransport};
use crate::voice::{EventSink, OpToken, Recognizer, StreamHandle, Synthesizer, VoiceEvent};

/// Conversational state; exactly one is active at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    Idle,
    Listening,
    Recognizing,
    AwaitingReply,
    Speaking,
    Ended,
}

/// Whether spoken input is still available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    /// Listening and speaking
    Voice,
    /// Typed input only; replies are still spoken
    TextOnly,
}

/// Everything the session's event loop processes
#[derive(Debug)]
pub enum Event {
    /// Callback from a capability adapter
    Voice(VoiceEvent),
    /// Completion of a `send_message` call
    Reply {
        token: OpToken,
        result: Result<Reply, TransportError>,
    },
    /// The recognition window of a listen operation elapsed
    ListenDeadline { token: OpToken },
    /// A scheduled utterance is due
    SpeakAt { token: OpToken, text: String },
}

/// Which part of the pipeline a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Capture,
    Recognition,
    Synthesis,
    Transport,
}

/// User-visible message for the rendering layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A step failed and the conversation fell back to idle
    Error {
        source: ErrorSource,
        message: String,
    },
    /// Spoken input is no longer available
    Downgraded { reason: String },
    /// Typed text arrived while a reply was still pending
    Busy,
    /// The session ended without a feedback artifact
    FeedbackUnavailable { reason: String },
}

/// Session data the orchestrator works on but does not own
pub struct TurnContext<'a> {
    pub session_id: &'a SessionId,
    pub transcript: &'a mut Transcript,
    pub capture: Option<&'a StreamHandle>,
}

/// The turn-taking state machine
pub struct Orchestrator {
    state: VoiceState,
    mode: VoiceMode,
    token: OpToken,
    recognizer: Box<dyn Recognizer>,
    synthesizer: Box<dyn Synthesizer>,
    transport: Arc<dyn SessionTransport>,
    events: mpsc::UnboundedSender<Event>,
    listening: bool,
    speaking: bool,
    intro_pending: bool,
    heard_speech: bool,
    listen_retries: u8,
    speak_retries: u8,
    pending_speech: Option<String>,
    timer: Option<JoinHandle<()>>,
    recognition_window: Duration,
    notices: Vec<Notice>,
}

impl Orchestrator {
    /// Create an idle orchestrator
    ///
    /// A zero `recognition_window` disables the listen deadline.
    #[must_use]
    pub fn new(
        recognizer: Box<dyn Recognizer>,
        synthesizer: Box<dyn Synthesizer>,
        transport: Arc<dyn SessionTransport>,
        events: mpsc::UnboundedSender<Event>,
        mode: VoiceMode,
        recognition_window: Duration,
    ) -> Self {
        Self {
            state: VoiceState::Idle,
            mode,
            token: OpToken::default(),
            recognizer,
            synthesizer,
            transport,
            events,
            listening: false,
            speaking: false,
            intro_pending: false,
            heard_speech: false,
            listen_retries: 0,
            speak_retries: 0,
            pending_speech: None,
            timer: None,
            recognition_window,
            notices: Vec::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> VoiceState {
        self.state
    }

    #[must_use]
    pub const fn mode(&self) -> VoiceMode {
        self.mode
    }

    /// Token of the current operation
    #[must_use]
    pub const fn token(&self) -> OpToken {
        self.token
    }

    /// A recognition operation is in flight
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.listening
    }

    /// A synthesis operation is in flight
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Drain notices accumulated since the last call
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Queue a notice for the rendering layer
    pub fn notify(&mut self, notice: Notice) {
        tracing::debug!(?notice, "notice");
        self.notices.push(notice);
    }

    /// Switch to typed input for the rest of the session
    pub fn downgrade(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.listening {
            self.recognizer.stop_listening();
            self.listening = false;
        }
        if self.mode == VoiceMode::TextOnly {
            return;
        }
        tracing::warn!(%reason, "voice input unavailable, continuing with typed input");
        self.mode = VoiceMode::TextOnly;
        self.notify(Notice::Downgraded { reason });
    }

    /// Speak the session's opening message after `delay`
    ///
    /// The orchestrator is `Speaking` from now on; the utterance itself is
    /// started by a scheduled [`Event::SpeakAt`] that any newer operation
    /// invalidates.
    pub fn introduce(&mut self, text: String, delay: Duration) {
        if self.state == VoiceState::Ended {
            return;
        }
        if delay.is_zero() {
            self.speak(text);
            return;
        }

        self.halt();
        self.bump();
        self.state = VoiceState::Speaking;
        self.intro_pending = true;
        self.speak_retries = 0;

        let token = self.token;
        let tx = self.events.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(Event::SpeakAt { token, text }).is_err() {
                tracing::trace!(%token, "event queue closed before intro");
            }
        }));
    }

    /// Start speaking `text`, stopping recognition first
    pub fn speak(&mut self, text: String) {
        if self.state == VoiceState::Ended {
            return;
        }
        self.speak_retries = 0;
        self.pending_speech = Some(text);
        self.arm_speaking();
    }

    /// Re-arm listening by hand from `Idle`
    pub fn listen(&mut self, capture: Option<&StreamHandle>) {
        if self.state != VoiceState::Idle {
            tracing::debug!(state = ?self.state, "listen ignored while busy");
            return;
        }

        if self.mode == VoiceMode::TextOnly {
            self.notify(Notice::Error {
                source: ErrorSource::Recognition,
                message: "voice input is unavailable, type your answer instead".to_string(),
            });
            return;
        }
        if capture.is_none() {
            self.notify(Notice::Error {
                source: ErrorSource::Capture,
                message: "microphone is off".to_string(),
            });
            return;
        }

        self.begin_listening(capture);
    }

    /// Start a fresh listen operation, cancelling synthesis first
    ///
    /// Falls back to `Idle` without capture or in text-only mode.
    pub fn begin_listening(&mut self, capture: Option<&StreamHandle>) {
        if self.state == VoiceState::Ended {
            return;
        }
        self.listen_retries = 0;
        self.arm_listening(capture);
    }

    /// Accept typed text
    ///
    /// Interrupts speech (barge-in) or listening; rejected with a `Busy`
    /// notice while a reply is pending.
    pub fn submit_text(&mut self, text: &str, ctx: TurnContext<'_>) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        match self.state {
            VoiceState::Ended => {
                tracing::debug!("text ignored after session end");
            }
            VoiceState::AwaitingReply => self.notify(Notice::Busy),
            VoiceState::Idle
            | VoiceState::Listening
            | VoiceState::Recognizing
            | VoiceState::Speaking => {
                if self.speaking || self.intro_pending {
                    tracing::debug!(token = %self.token, "barge-in");
                }
                self.halt();
                self.send(text.to_string(), ctx);
            }
        }
    }

    /// Stop everything for good
    pub fn shutdown(&mut self) {
        self.halt();
        self.bump();
        self.pending_speech = None;
        self.state = VoiceState::Ended;
        tracing::debug!(token = %self.token, "orchestrator shut down");
    }

    /// The capture stream is gone; listening cannot continue
    pub fn on_capture_released(&mut self) {
        if self.listening {
            self.recognizer.stop_listening();
            self.listening = false;
        }
        if matches!(self.state, VoiceState::Listening | VoiceState::Recognizing) {
            self.bump();
            self.state = VoiceState::Idle;
        }
    }

    /// Surface a capture failure
    pub fn capture_failed(&mut self, error: &AdapterError) {
        if error.is_permanent() {
            self.downgrade(error.to_string());
        } else {
            self.notify(Notice::Error {
                source: ErrorSource::Capture,
                message: error.to_string(),
            });
        }
    }

    /// Process one event from the session queue
    pub fn on_event(&mut self, event: Event, ctx: TurnContext<'_>) {
        if self.state == VoiceState::Ended {
            tracing::trace!(?event, "discarding event after end");
            return;
        }

        match event {
            Event::Voice(voice) => self.on_voice(voice, ctx),
            Event::Reply { token, result } => {
                if token != self.token || self.state != VoiceState::AwaitingReply {
                    tracing::debug!(%token, current = %self.token, "discarding stale reply");
                    return;
                }
                self.on_reply(result, ctx);
            }
            Event::ListenDeadline { token } => {
                if token == self.token && self.listening && !self.heard_speech {
                    tracing::debug!(%token, "recognition window elapsed");
                    self.listen_failed(AdapterError::RecognitionTimeout, ctx.capture);
                }
            }
            Event::SpeakAt { token, text } => {
                if token == self.token && self.intro_pending {
                    self.intro_pending = false;
                    self.speak(text);
                }
            }
        }
    }

    fn on_voice(&mut self, event: VoiceEvent, ctx: TurnContext<'_>) {
        if event.token() != Some(self.token) {
            tracing::trace!(?event, current = %self.token, "discarding stale voice event");
            return;
        }

        match event {
            VoiceEvent::Partial { .. } if self.listening => {
                self.heard_speech = true;
                if self.state == VoiceState::Listening {
                    self.state = VoiceState::Recognizing;
                }
            }
            VoiceEvent::Final { text, .. } if self.listening => {
                self.recognizer.stop_listening();
                self.listening = false;
                self.cancel_timer();

                let text = text.trim();
                if text.is_empty() {
                    tracing::debug!("empty recognition result, listening again");
                    self.begin_listening(ctx.capture);
                } else {
                    self.send(text.to_string(), ctx);
                }
            }
            VoiceEvent::ListenEnded { .. } if self.listening => {
                self.listen_failed(AdapterError::RecognitionTimeout, ctx.capture);
            }
            VoiceEvent::ListenFailed { error, .. } if self.listening => {
                self.listen_failed(error, ctx.capture);
            }
            VoiceEvent::SpeechStarted { token } => {
                tracing::trace!(%token, "speech started");
            }
            VoiceEvent::SpeechFinished { .. } if self.speaking => {
                self.speaking = false;
                self.pending_speech = None;
                if self.state != VoiceState::Speaking {
                    return;
                }
                if self.mode == VoiceMode::Voice && ctx.capture.is_some() {
                    self.begin_listening(ctx.capture);
                } else {
                    self.state = VoiceState::Idle;
                }
            }
            VoiceEvent::SpeechFailed { error, .. } if self.speaking => {
                self.speaking = false;
                self.speak_failed(error);
            }
            other => {
                tracing::trace!(event = ?other, "voice event not applicable");
            }
        }
    }

    fn on_reply(&mut self, result: Result<Reply, TransportError>, ctx: TurnContext<'_>) {
        match result {
            Ok(reply) => {
                tracing::debug!(session_id = %ctx.session_id, chars = reply.text.len(), "reply received");
                ctx.transcript.push(Speaker::Agent, reply.text.clone());
                self.speak(reply.text);
            }
            Err(error) => {
                tracing::warn!(session_id = %ctx.session_id, error = %error, "message not delivered");
                self.state = VoiceState::Idle;
                self.notify(Notice::Error {
                    source: ErrorSource::Transport,
                    message: error.to_string(),
                });
            }
        }
    }

    /// Append the user turn, then hand it to the transport
    fn send(&mut self, text: String, ctx: TurnContext<'_>) {
        ctx.transcript.push(Speaker::User, text.clone());
        self.bump();
        self.state = VoiceState::AwaitingReply;

        let token = self.token;
        let transport = Arc::clone(&self.transport);
        let session_id = ctx.session_id.clone();
        let tx = self.events.clone();

        tracing::debug!(%token, session_id = %session_id, "sending message");
        tokio::spawn(async move {
            let result = transport.send_message(&session_id, &text).await;
            if tx.send(Event::Reply { token, result }).is_err() {
                tracing::trace!(%token, "event queue closed before reply");
            }
        });
    }

    fn arm_listening(&mut self, capture: Option<&StreamHandle>) {
        self.halt();
        self.bump();

        let Some(stream) = capture.filter(|_| self.mode == VoiceMode::Voice) else {
            self.state = VoiceState::Idle;
            return;
        };

        let token = self.token;
        let sink = EventSink::new(self.events.clone());
        match self.recognizer.start_listening(token, stream, sink) {
            Ok(()) => {
                self.listening = true;
                self.heard_speech = false;
                self.state = VoiceState::Listening;
                self.schedule_deadline();
            }
            Err(error) => self.listen_failed(error, capture),
        }
    }

    fn listen_failed(&mut self, error: AdapterError, capture: Option<&StreamHandle>) {
        self.recognizer.stop_listening();
        self.listening = false;
        self.cancel_timer();

        if error.is_permanent() {
            self.state = VoiceState::Idle;
            self.downgrade(error.to_string());
        } else if self.listen_retries == 0 {
            self.listen_retries += 1;
            tracing::debug!(error = %error, "retrying listen");
            self.arm_listening(capture);
        } else {
            tracing::warn!(error = %error, "listening failed");
            self.state = VoiceState::Idle;
            self.notify(Notice::Error {
                source: ErrorSource::Recognition,
                message: error.to_string(),
            });
        }
    }

    fn arm_speaking(&mut self) {
        self.halt();
        self.bump();

        let Some(text) = self.pending_speech.clone() else {
            self.state = VoiceState::Idle;
            return;
        };

        let token = self.token;
        let sink = EventSink::new(self.events.clone());
        match self.synthesizer.speak(token, &text, sink) {
            Ok(()) => {
                self.speaking = true;
                self.state = VoiceState::Speaking;
            }
            Err(error) => self.speak_failed(error),
        }
    }

    fn speak_failed(&mut self, error: AdapterError) {
        if self.speak_retries == 0 && !error.is_permanent() && self.pending_speech.is_some() {
            self.speak_retries += 1;
            tracing::debug!(error = %error, "retrying speech");
            self.arm_speaking();
            return;
        }

        tracing::warn!(error = %error, "speech failed");
        self.pending_speech = None;
        self.state = VoiceState::Idle;
        self.notify(Notice::Error {
            source: ErrorSource::Synthesis,
            message: error.to_string(),
        });
    }

    /// Stop whichever operation is in flight; both calls are synchronous
    ///
    /// A scheduled intro counts as speech in flight.
    fn halt(&mut self) {
        if self.listening {
            self.recognizer.stop_listening();
            self.listening = false;
        }
        if self.speaking || self.intro_pending {
            self.synthesizer.cancel_all();
            self.speaking = false;
            self.intro_pending = false;
        }
        self.cancel_timer();
    }

    fn bump(&mut self) {
        self.token = self.token.next();
    }

    fn schedule_deadline(&mut self) {
        if self.recognition_window.is_zero() {
            return;
        }

        let token = self.token;
        let window = self.recognition_window;
        let tx = self.events.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if tx.send(Event::ListenDeadline { token }).is_err() {
                tracing::trace!(%token, "event queue closed before deadline");
            }
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.halt();
    }
}

//! Session lifecycle controller
//!
//! [`InterviewSession`] owns everything with a lifetime longer than one turn:
//! the remote session id, the transcript, the capture stream and the event
//! queue that adapters, transport calls and timers post into. Events are
//! processed one at a time, in arrival order, by [`InterviewSession::step`]
//! or [`InterviewSession::run`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::AdapterError;
use crate::orchestrator::{Event, Notice, Orchestrator, TurnContext, VoiceMode, VoiceState};
use crate::transcript::{Speaker, Transcript, Turn};
use crate::transport::{Feedback, Resume, SessionId, SessionTransport};
use crate::voice::{Capabilities, Capture, EventSink, StreamHandle, VoiceEvent};
use crate::{Error, Result};

/// Lifecycle of the remote session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Ending,
    Ended,
}

/// An open interview session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
}

/// Timing knobs for a session
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Start with spoken input enabled
    pub voice: bool,
    /// How long one listen operation waits for speech (zero disables)
    pub recognition_window: Duration,
    /// Pause before the opening message is spoken
    pub intro_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            voice: true,
            recognition_window: Duration::from_secs(8),
            intro_delay: Duration::from_millis(1500),
        }
    }
}

/// Input from the rendering layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Typed answer
    Submit(String),
    /// Re-arm listening by hand
    Listen,
    /// Turn the microphone on or off
    ToggleCapture,
    /// Finish the interview
    End,
}

/// Read-only view for rendering
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub session: Option<Session>,
    pub state: SessionState,
    pub voice_state: VoiceState,
    pub voice_mode: VoiceMode,
    pub capture_active: bool,
    pub transcript: Vec<Turn>,
    pub feedback: Option<Feedback>,
}

/// Drives one interview from start to feedback
pub struct InterviewSession {
    state: SessionState,
    session: Option<Session>,
    transcript: Transcript,
    feedback: Option<Feedback>,
    capture: Box<dyn Capture>,
    stream: Option<StreamHandle>,
    orchestrator: Orchestrator,
    transport: Arc<dyn SessionTransport>,
    events: mpsc::UnboundedReceiver<Event>,
    sink: EventSink,
    settings: SessionSettings,
}

impl InterviewSession {
    /// Create a session that has not been started yet
    #[must_use]
    pub fn new(
        capabilities: Capabilities,
        transport: Arc<dyn SessionTransport>,
        settings: SessionSettings,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let mode = if settings.voice {
            VoiceMode::Voice
        } else {
            VoiceMode::TextOnly
        };
        let sink = EventSink::new(tx.clone());
        let orchestrator = Orchestrator::new(
            capabilities.recognizer,
            capabilities.synthesizer,
            Arc::clone(&transport),
            tx,
            mode,
            settings.recognition_window,
        );

        Self {
            state: SessionState::Idle,
            session: None,
            transcript: Transcript::new(),
            feedback: None,
            capture: capabilities.capture,
            stream: None,
            orchestrator,
            transport,
            events,
            sink,
            settings,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn voice_state(&self) -> VoiceState {
        self.orchestrator.state()
    }

    #[must_use]
    pub const fn voice_mode(&self) -> VoiceMode {
        self.orchestrator.mode()
    }

    /// Token of the orchestrator's current operation
    #[must_use]
    pub const fn current_token(&self) -> crate::voice::OpToken {
        self.orchestrator.token()
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub const fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    /// Whether the microphone stream is held
    #[must_use]
    pub const fn capture_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether recognition or synthesis is in flight
    #[must_use]
    pub const fn activity(&self) -> (bool, bool) {
        (self.orchestrator.is_listening(), self.orchestrator.is_speaking())
    }

    /// Drain notices accumulated since the last call
    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.orchestrator.take_notices()
    }

    /// Export the read-only view
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            session: self.session.clone(),
            state: self.state,
            voice_state: self.orchestrator.state(),
            voice_mode: self.orchestrator.mode(),
            capture_active: self.stream.is_some(),
            transcript: self.transcript.to_history(),
            feedback: self.feedback.clone(),
        }
    }

    /// Open the remote session and begin the intro
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already started, or `SessionStartFailed` if
    /// the service refuses; no session or capture is held afterwards.
    pub async fn start(&mut self, job_description: &str, resume: Option<&Resume>) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot start a session while {:?}",
                self.state
            )));
        }

        self.state = SessionState::Starting;
        let started = match self.transport.start_session(job_description, resume).await {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start session");
                self.state = SessionState::Idle;
                return Err(Error::SessionStartFailed(e));
            }
        };

        tracing::info!(session_id = %started.session_id, "session started");
        self.session = Some(Session {
            id: started.session_id,
            created_at: Utc::now(),
        });
        self.state = SessionState::Active;
        self.transcript.push(Speaker::Agent, started.first_message.clone());

        self.acquire_capture();
        self.orchestrator.introduce(started.first_message, self.settings.intro_delay);
        Ok(())
    }

    /// Finish the session and collect feedback
    ///
    /// Cancels orchestration, releases capture and always asks the service
    /// to end the session. Calling it again returns the stored result.
    pub async fn end(&mut self) -> Option<&Feedback> {
        if matches!(self.state, SessionState::Ending | SessionState::Ended) {
            return self.feedback.as_ref();
        }

        self.state = SessionState::Ending;
        self.orchestrator.shutdown();
        self.release_capture();

        if let Some(id) = self.session.as_ref().map(|s| s.id.clone()) {
            match self.transport.end_session(&id).await {
                Ok(feedback) => {
                    tracing::info!(session_id = %id, score = feedback.score, "session ended");
                    self.feedback = Some(feedback);
                }
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "failed to end session");
                    self.orchestrator.notify(Notice::FeedbackUnavailable {
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.state = SessionState::Ended;
        self.feedback.as_ref()
    }

    /// Accept a typed answer
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is active
    pub fn submit_text(&mut self, text: &str) -> Result<()> {
        let Some(session) = self.session.as_ref().filter(|_| self.state == SessionState::Active)
        else {
            return Err(Error::InvalidState(
                "no active session to send to".to_string(),
            ));
        };

        self.orchestrator.submit_text(
            text,
            TurnContext {
                session_id: &session.id,
                transcript: &mut self.transcript,
                capture: self.stream.as_ref(),
            },
        );
        Ok(())
    }

    /// Re-arm listening from `Idle`, reacquiring the microphone if needed
    ///
    /// A failed reacquire has already been reported, so nothing else is.
    pub fn listen(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        if self.stream.is_none()
            && self.orchestrator.mode() == VoiceMode::Voice
            && !self.acquire_capture()
        {
            return;
        }
        self.orchestrator.listen(self.stream.as_ref());
    }

    /// Acquire or release the microphone mid-session
    ///
    /// Returns whether capture is active afterwards.
    pub fn toggle_capture(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }

        if self.stream.is_some() {
            self.release_capture();
            self.orchestrator.on_capture_released();
            return false;
        }

        if self.acquire_capture() && self.orchestrator.state() == VoiceState::Idle {
            self.orchestrator.begin_listening(self.stream.as_ref());
        }
        self.stream.is_some()
    }

    /// Process one queued event
    pub fn handle_event(&mut self, event: Event) {
        if let Event::Voice(VoiceEvent::CaptureLost { error }) = event {
            if self.stream.is_none() || self.state != SessionState::Active {
                tracing::debug!(error = %error, "ignoring loss of a released capture stream");
                return;
            }
            tracing::warn!(error = %error, "capture lost");
            self.release_capture();
            self.orchestrator.on_capture_released();
            self.orchestrator.capture_failed(&error);
            return;
        }

        let Some(session) = self.session.as_ref().filter(|_| self.state == SessionState::Active)
        else {
            tracing::trace!(?event, state = ?self.state, "discarding event outside active session");
            return;
        };

        self.orchestrator.on_event(
            event,
            TurnContext {
                session_id: &session.id,
                transcript: &mut self.transcript,
                capture: self.stream.as_ref(),
            },
        );
    }

    /// Wait for the next event and process it
    ///
    /// Returns `false` once the queue is closed.
    pub async fn step(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Process every event already queued, without waiting
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            processed += 1;
        }
        processed
    }

    /// Event loop: multiplex UI commands with adapter and transport events
    ///
    /// `on_update` runs after every command or event. The loop ends after
    /// `Command::End` or when the command channel closes, in both cases
    /// ending the session first.
    pub async fn run<F>(&mut self, mut commands: mpsc::Receiver<Command>, mut on_update: F)
    where
        F: FnMut(&mut Self),
    {
        while self.state != SessionState::Ended {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Submit(text)) => {
                            if let Err(e) = self.submit_text(&text) {
                                tracing::warn!(error = %e, "typed text rejected");
                            }
                        }
                        Some(Command::Listen) => self.listen(),
                        Some(Command::ToggleCapture) => {
                            let active = self.toggle_capture();
                            tracing::debug!(active, "capture toggled");
                        }
                        Some(Command::End) | None => {
                            self.end().await;
                        }
                    }
                }
                Some(event) = self.events.recv() => self.handle_event(event),
            }
            on_update(self);
        }
    }

    /// Open the microphone, retrying once on a transient failure
    fn acquire_capture(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        if self.orchestrator.mode() == VoiceMode::TextOnly {
            return false;
        }

        let mut attempt = self.capture.start_capture(self.sink.clone());
        if let Err(ref e) = attempt
            && !e.is_permanent()
        {
            tracing::debug!(error = %e, "retrying capture");
            attempt = self.capture.start_capture(self.sink.clone());
        }

        match attempt {
            Ok(stream) => {
                tracing::debug!(stream_id = stream.id(), "capture acquired");
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                self.report_capture_error(&e);
                false
            }
        }
    }

    fn report_capture_error(&mut self, error: &AdapterError) {
        tracing::warn!(error = %error, "capture unavailable");
        self.orchestrator.capture_failed(error);
    }

    fn release_capture(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.capture.stop_capture(stream);
        }
    }
}

impl Drop for InterviewSession {
    fn drop(&mut self) {
        self.release_capture();
    }
}

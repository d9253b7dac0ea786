//! Shared test utilities
//!
//! Mock adapters record every call in a shared [`Probe`] so tests can check
//! what the orchestrator asked for, and a [`MockTransport`] plays back
//! scripted service responses.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use intervox::transport::{Reply, SessionStart};
use intervox::voice::{
    Capabilities, Capture, EventSink, OpToken, Recognizer, StreamHandle, Synthesizer, VoiceEvent,
};
use intervox::{
    AdapterError, Event, Feedback, InterviewSession, Resume, SessionId, SessionSettings,
    SessionTransport, TransportError,
};

pub const FIRST_MESSAGE: &str = "Hello, tell me about yourself";

/// What the mock adapters have been asked to do
#[derive(Debug, Default)]
pub struct Probe {
    pub capturing: bool,
    pub capture_attempts: usize,
    pub capture_stops: usize,
    pub listening: bool,
    pub listen_starts: usize,
    pub speaking: bool,
    pub spoken: Vec<String>,
    pub cancels: usize,
    /// Set if listening and speaking were ever active together
    pub overlapped: bool,
    /// Where the current capture stream reports its loss
    pub capture_sink: Option<EventSink>,
    pub capture_failures: VecDeque<AdapterError>,
    pub listen_failures: VecDeque<AdapterError>,
    pub speak_failures: VecDeque<AdapterError>,
}

impl Probe {
    fn check_overlap(&mut self) {
        if self.listening && self.speaking {
            self.overlapped = true;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedProbe(Arc<Mutex<Probe>>);

impl SharedProbe {
    pub fn get(&self) -> MutexGuard<'_, Probe> {
        self.0.lock().expect("probe lock poisoned")
    }
}

struct MockCapture {
    probe: SharedProbe,
    next_id: u64,
}

impl Capture for MockCapture {
    fn start_capture(&mut self, sink: EventSink) -> Result<StreamHandle, AdapterError> {
        let mut probe = self.probe.get();
        probe.capture_attempts += 1;
        if let Some(error) = probe.capture_failures.pop_front() {
            return Err(error);
        }
        probe.capturing = true;
        probe.capture_sink = Some(sink);
        self.next_id += 1;
        Ok(StreamHandle::new(self.next_id))
    }

    fn stop_capture(&mut self, _handle: StreamHandle) {
        let mut probe = self.probe.get();
        probe.capturing = false;
        probe.capture_stops += 1;
    }
}

struct MockRecognizer {
    probe: SharedProbe,
}

impl Recognizer for MockRecognizer {
    fn start_listening(
        &mut self,
        _token: OpToken,
        _stream: &StreamHandle,
        _sink: EventSink,
    ) -> Result<(), AdapterError> {
        let mut probe = self.probe.get();
        if let Some(error) = probe.listen_failures.pop_front() {
            return Err(error);
        }
        probe.listening = true;
        probe.listen_starts += 1;
        probe.check_overlap();
        Ok(())
    }

    fn stop_listening(&mut self) {
        self.probe.get().listening = false;
    }
}

struct MockSynthesizer {
    probe: SharedProbe,
}

impl Synthesizer for MockSynthesizer {
    fn speak(&mut self, _token: OpToken, text: &str, _sink: EventSink) -> Result<(), AdapterError> {
        let mut probe = self.probe.get();
        if let Some(error) = probe.speak_failures.pop_front() {
            return Err(error);
        }
        probe.speaking = true;
        probe.spoken.push(text.to_string());
        probe.check_overlap();
        Ok(())
    }

    fn cancel_all(&mut self) {
        let mut probe = self.probe.get();
        probe.speaking = false;
        probe.cancels += 1;
    }
}

/// Mock capability set sharing one probe
pub fn mock_capabilities(probe: &SharedProbe) -> Capabilities {
    Capabilities {
        capture: Box::new(MockCapture {
            probe: probe.clone(),
            next_id: 0,
        }),
        recognizer: Box::new(MockRecognizer {
            probe: probe.clone(),
        }),
        synthesizer: Box::new(MockSynthesizer {
            probe: probe.clone(),
        }),
    }
}

/// Scripted session service
pub struct MockTransport {
    pub start_result: Mutex<Result<SessionStart, TransportError>>,
    pub replies: Mutex<VecDeque<Result<Reply, TransportError>>>,
    pub end_result: Mutex<Result<Feedback, TransportError>>,
    pub sent: Mutex<Vec<String>>,
    pub start_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub end_calls: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            start_result: Mutex::new(Ok(SessionStart {
                session_id: SessionId::new("s1"),
                first_message: FIRST_MESSAGE.to_string(),
            })),
            replies: Mutex::new(VecDeque::new()),
            end_result: Mutex::new(Ok(sample_feedback())),
            sent: Mutex::new(Vec::new()),
            start_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            end_calls: AtomicUsize::new(0),
        }
    }
}

impl MockTransport {
    pub fn failing_start(error: TransportError) -> Self {
        let transport = Self::default();
        *transport.start_result.lock().unwrap() = Err(error);
        transport
    }

    pub fn queue_reply(&self, reply: Result<&str, TransportError>) {
        self.replies.lock().unwrap().push_back(reply.map(|text| Reply {
            text: text.to_string(),
        }));
    }

    pub fn fail_end(&self, error: TransportError) {
        *self.end_result.lock().unwrap() = Err(error);
    }

    pub fn sends(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn start_session(
        &self,
        _job_description: &str,
        _resume: Option<&Resume>,
    ) -> Result<SessionStart, TransportError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.start_result.lock().unwrap().clone()
    }

    async fn send_message(
        &self,
        _session_id: &SessionId,
        text: &str,
    ) -> Result<Reply, TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(text.to_string());
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(Reply {
                text: "Interesting. Tell me more.".to_string(),
            })
        })
    }

    async fn end_session(&self, _session_id: &SessionId) -> Result<Feedback, TransportError> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        self.end_result.lock().unwrap().clone()
    }
}

pub fn sample_feedback() -> Feedback {
    Feedback {
        score: 82,
        summary: "Clear answers with good structure.".to_string(),
        strengths: vec!["Communication".to_string()],
        weaknesses: vec!["System design depth".to_string()],
    }
}

/// Settings with no intro delay and no listen deadline
pub fn instant_settings() -> SessionSettings {
    SessionSettings {
        voice: true,
        recognition_window: Duration::ZERO,
        intro_delay: Duration::ZERO,
    }
}

/// Session wired to mocks
pub fn mock_session(
    transport: &Arc<MockTransport>,
    probe: &SharedProbe,
    settings: SessionSettings,
) -> InterviewSession {
    InterviewSession::new(
        mock_capabilities(probe),
        Arc::clone(transport) as Arc<dyn SessionTransport>,
        settings,
    )
}

/// Let spawned transport calls finish and process what they posted
pub async fn settle(session: &mut InterviewSession) {
    for _ in 0..10 {
        tokio::task::yield_now().await;
        session.drain();
    }
}

/// Deliver a voice event for the session's current operation
pub fn deliver(session: &mut InterviewSession, event: impl FnOnce(OpToken) -> VoiceEvent) {
    let token = session.current_token();
    session.handle_event(Event::Voice(event(token)));
}

/// The capture device fails underneath the session
pub fn lose_capture(probe: &SharedProbe, error: AdapterError) {
    let sink = probe.get().capture_sink.clone().expect("capture was never started");
    sink.emit(VoiceEvent::CaptureLost { error });
}

/// Audio output finished on its own
pub fn finish_speech(session: &mut InterviewSession, probe: &SharedProbe) {
    probe.get().speaking = false;
    deliver(session, |token| VoiceEvent::SpeechFinished { token });
}

/// The recognizer heard `text`
pub fn hear(session: &mut InterviewSession, text: &str) {
    let text = text.to_string();
    deliver(session, |token| VoiceEvent::Partial {
        token,
        text: String::new(),
    });
    deliver(session, move |token| VoiceEvent::Final { token, text });
}

//! Intervox - hands-free voice orchestrator for live mock interviews
//!
//! This library provides the core of a live interview session:
//! - Turn-taking between the candidate and a remote interviewer agent
//! - Voice capture, speech-to-text and text-to-speech behind narrow traits
//! - The session service client (start, message, end)
//! - An append-only transcript and the final feedback artifact
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Rendering layer                     │
//! │      Commands (text, listen, mic, end) │ Snapshot    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                InterviewSession                      │
//! │   Lifecycle  │  Capture  │  Transcript  │  Events    │
//! │              ▼                                       │
//! │          Orchestrator (turn-taking state machine)    │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼───────────┐   ┌─────────────▼────────────┐
//! │  Voice adapters       │   │  Session transport       │
//! │  Mic │ STT │ TTS      │   │  start │ chat │ end      │
//! └───────────────────────┘   └──────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod transcript;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{AdapterError, Error, Result, TranscriptError, TransportError};
pub use orchestrator::{ErrorSource, Event, Notice, Orchestrator, VoiceMode, VoiceState};
pub use session::{Command, InterviewSession, Session, SessionSettings, SessionState, Snapshot};
pub use transcript::{Speaker, Transcript, Turn};
pub use transport::{Feedback, HttpTransport, Resume, SessionId, SessionTransport};

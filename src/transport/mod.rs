//! Session service boundary
//!
//! Three request/response calls open a session, exchange messages and close
//! it. Implementations never retry on their own: whether a request is
//! repeated is the orchestrator's decision.

mod http;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TransportError;

pub use http::HttpTransport;

/// Identifier the remote service assigns to a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawSessionId", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// The service has issued both integer and string ids
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSessionId {
    Int(i64),
    Str(String),
}

impl From<RawSessionId> for SessionId {
    fn from(raw: RawSessionId) -> Self {
        match raw {
            RawSessionId::Int(n) => Self(n.to_string()),
            RawSessionId::Str(s) => Self(s),
        }
    }
}

/// Optional resume document sent with the start request
#[derive(Debug, Clone)]
pub struct Resume {
    /// File name reported to the service
    pub file_name: String,
    /// MIME type of the document
    pub mime_type: String,
    /// Raw document bytes
    pub bytes: Vec<u8>,
}

impl Resume {
    /// Read a resume from disk, guessing the MIME type from its extension
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map_or_else(|| "resume".to_string(), |n| n.to_string_lossy().into_owned());
        let mime_type = mime_for(path).to_string();

        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" | "md" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Result of a successful start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    /// Identifier for all later calls
    pub session_id: SessionId,
    /// The interviewer's opening line
    pub first_message: String,
}

/// Agent reply to a user message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Text to show and speak
    pub text: String,
}

/// Final assessment returned when a session ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Overall score, 0 to 100
    #[serde(default, deserialize_with = "deserialize_score")]
    pub score: u8,
    /// Short narrative summary
    #[serde(default)]
    pub summary: String,
    /// What went well
    #[serde(default)]
    pub strengths: Vec<String>,
    /// What to improve
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// Scores arrive as any JSON number and may fall outside 0..=100
fn deserialize_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or_default();
    let clamped = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 100.0) };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = clamped.round() as u8;
    Ok(score)
}

/// The remote chat/session collaborator
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Open a session for a job description and optional resume
    async fn start_session(
        &self,
        job_description: &str,
        resume: Option<&Resume>,
    ) -> Result<SessionStart, TransportError>;

    /// Send one user turn and wait for the agent's reply
    async fn send_message(&self, session_id: &SessionId, text: &str)
    -> Result<Reply, TransportError>;

    /// Close the session and collect feedback
    async fn end_session(&self, session_id: &SessionId) -> Result<Feedback, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_accepts_numbers_and_strings() {
        let numeric: SessionId = serde_json::from_str("42").unwrap();
        assert_eq!(numeric.as_str(), "42");

        let text: SessionId = serde_json::from_str("\"s1\"").unwrap();
        assert_eq!(text, SessionId::new("s1"));
        assert_eq!(serde_json::to_string(&text).unwrap(), "\"s1\"");
    }

    #[test]
    fn feedback_defaults_and_clamps() {
        let feedback: Feedback =
            serde_json::from_str(r#"{"score": 140.2, "summary": "Solid"}"#).unwrap();
        assert_eq!(feedback.score, 100);
        assert_eq!(feedback.summary, "Solid");
        assert!(feedback.strengths.is_empty());
        assert!(feedback.weaknesses.is_empty());

        let negative: Feedback = serde_json::from_str(r#"{"score": -3}"#).unwrap();
        assert_eq!(negative.score, 0);

        let missing: Feedback = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.score, 0);
    }

    #[test]
    fn resume_mime_from_extension() {
        assert_eq!(mime_for(Path::new("cv.PDF")), "application/pdf");
        assert_eq!(mime_for(Path::new("cv.txt")), "text/plain");
        assert_eq!(mime_for(Path::new("cv")), "application/octet-stream");
    }
}

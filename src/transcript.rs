//! Append-only conversation log
//!
//! Every utterance of either party is recorded exactly once. Sequence numbers
//! start at 1 and grow by one per turn; a turn can never be rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TranscriptError;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The candidate
    User,
    /// The remote interviewer
    Agent,
}

impl Speaker {
    /// Label used when rendering a transcript line
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Agent => "Interviewer",
        }
    }
}

/// One recorded utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who spoke
    pub speaker: Speaker,
    /// What was said or typed
    pub content: String,
    /// Position in the transcript, starting at 1
    pub sequence: u64,
    /// When the turn was recorded
    pub timestamp: DateTime<Utc>,
}

/// Ordered turns of a single session
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Create an empty transcript
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Sequence number the next turn will receive
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.turns.last().map_or(1, |t| t.sequence + 1)
    }

    /// Record a new turn stamped with the current time
    pub fn push(&mut self, speaker: Speaker, content: impl Into<String>) -> &Turn {
        let turn = Turn {
            speaker,
            content: content.into(),
            sequence: self.next_sequence(),
            timestamp: Utc::now(),
        };
        tracing::trace!(sequence = turn.sequence, speaker = ?speaker, "turn recorded");
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    /// Append a fully formed turn
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrder` unless the turn carries exactly the next sequence number
    pub fn append(&mut self, turn: Turn) -> Result<&Turn, TranscriptError> {
        let expected = self.next_sequence();
        if turn.sequence != expected {
            return Err(TranscriptError::OutOfOrder {
                expected,
                found: turn.sequence,
            });
        }

        self.turns.push(turn);
        Ok(&self.turns[self.turns.len() - 1])
    }

    /// All turns in append order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Owned copy of the turns in append order
    #[must_use]
    pub fn to_history(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Most recent turn
    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Number of recorded turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether nothing has been said yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_start_at_one_and_have_no_gaps() {
        let mut transcript = Transcript::new();
        transcript.push(Speaker::Agent, "Hello, tell me about yourself");
        transcript.push(Speaker::User, "I build backends");
        transcript.push(Speaker::Agent, "Which databases?");

        let sequences: Vec<u64> = transcript.turns().iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(transcript.next_sequence(), 4);
    }

    #[test]
    fn history_preserves_append_order() {
        let mut transcript = Transcript::new();
        for i in 0..10 {
            let speaker = if i % 2 == 0 { Speaker::Agent } else { Speaker::User };
            transcript.push(speaker, format!("turn {i}"));
        }

        let history = transcript.to_history();
        assert_eq!(history.len(), 10);
        for (i, turn) in history.iter().enumerate() {
            assert_eq!(turn.content, format!("turn {i}"));
            assert_eq!(turn.sequence, i as u64 + 1);
        }
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn append_rejects_rewrites_and_gaps() {
        let mut transcript = Transcript::new();
        let first = transcript.push(Speaker::Agent, "Hi").clone();

        let rewrite = Turn {
            content: "Hi again".to_string(),
            ..first.clone()
        };
        assert_eq!(
            transcript.append(rewrite),
            Err(TranscriptError::OutOfOrder {
                expected: 2,
                found: 1
            })
        );

        let skip = Turn {
            sequence: 5,
            ..first
        };
        assert!(transcript.append(skip).is_err());
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.turns()[0].content, "Hi");
    }

    #[test]
    fn append_accepts_next_sequence() {
        let mut transcript = Transcript::new();
        let turn = Turn {
            speaker: Speaker::User,
            content: "typed".to_string(),
            sequence: 1,
            timestamp: Utc::now(),
        };

        let stored = transcript.append(turn).unwrap();
        assert_eq!(stored.sequence, 1);
        assert_eq!(transcript.last().map(|t| t.speaker), Some(Speaker::User));
    }

    #[test]
    fn speaker_serializes_lowercase() {
        let json = serde_json::to_string(&Speaker::Agent).unwrap();
        assert_eq!(json, "\"agent\"");
    }
}

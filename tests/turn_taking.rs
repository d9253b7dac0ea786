//! Randomized turn-taking tests
//!
//! Replays seeded random interleavings of user commands, adapter callbacks
//! and transport completions, checking after every step that listening and
//! speaking never overlap and that the transcript stays gap-free.

use std::sync::Arc;

use intervox::voice::{OpToken, VoiceEvent};
use intervox::{AdapterError, SessionState, TransportError, VoiceState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

mod common;

use common::{MockTransport, SharedProbe, deliver, instant_settings, mock_session, settle};

const STEPS: usize = 300;

#[allow(clippy::too_many_lines)]
async fn interleave(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let transport = Arc::new(MockTransport::default());
    let probe = SharedProbe::default();
    let mut session = mock_session(&transport, &probe, instant_settings());
    session.start("Backend Engineer", None).await.unwrap();

    for step in 0..STEPS {
        match rng.gen_range(0..12) {
            0 => {
                session.submit_text(&format!("answer {step}")).unwrap();
            }
            1 => session.listen(),
            2 => {
                session.toggle_capture();
            }
            3 => deliver(&mut session, |token| VoiceEvent::Partial {
                token,
                text: "ans".to_string(),
            }),
            4 => deliver(&mut session, |token| VoiceEvent::Final {
                token,
                text: format!("spoken {step}"),
            }),
            5 => deliver(&mut session, |token| VoiceEvent::ListenEnded { token }),
            6 => deliver(&mut session, |token| VoiceEvent::ListenFailed {
                token,
                error: AdapterError::RecognitionFailed("glitch".to_string()),
            }),
            7 => {
                probe.get().speaking = false;
                deliver(&mut session, |token| VoiceEvent::SpeechFinished { token });
            }
            8 => {
                probe.get().speaking = false;
                deliver(&mut session, |token| VoiceEvent::SpeechFailed {
                    token,
                    error: AdapterError::SynthesisError("glitch".to_string()),
                });
            }
            9 => {
                // Stale events from long-gone operations
                session.handle_event(intervox::Event::Voice(VoiceEvent::Final {
                    token: OpToken::default(),
                    text: "ghost".to_string(),
                }));
                session.handle_event(intervox::Event::Voice(VoiceEvent::SpeechFinished {
                    token: OpToken::default(),
                }));
            }
            10 => {
                if rng.gen_bool(0.3) {
                    transport.queue_reply(Err(TransportError::Service("flaky".to_string())));
                }
                settle(&mut session).await;
            }
            _ => settle(&mut session).await,
        }

        let (listening, speaking) = session.activity();
        assert!(
            !(listening && speaking),
            "seed {seed} step {step}: listening and speaking at once"
        );

        let probe = probe.get();
        assert!(!probe.overlapped, "seed {seed} step {step}: adapters overlapped");
        assert_eq!(probe.listening, listening, "seed {seed} step {step}");
        assert_eq!(probe.speaking, speaking, "seed {seed} step {step}");
        drop(probe);

        match session.voice_state() {
            VoiceState::Listening | VoiceState::Recognizing => assert!(listening),
            VoiceState::Idle | VoiceState::AwaitingReply => {
                assert!(!listening && !speaking, "seed {seed} step {step}");
            }
            VoiceState::Speaking => assert!(!listening),
            VoiceState::Ended => unreachable!("session ended without end()"),
        }
    }

    let sequences: Vec<u64> = session
        .transcript()
        .turns()
        .iter()
        .map(|t| t.sequence)
        .collect();
    let expected: Vec<u64> = (1..=sequences.len() as u64).collect();
    assert_eq!(sequences, expected, "seed {seed}: transcript has gaps");

    session.end().await;
    session.end().await;
    settle(&mut session).await;

    assert_eq!(session.state(), SessionState::Ended);
    assert_eq!(transport.ends(), 1);
    let probe = probe.get();
    assert!(!probe.listening && !probe.speaking && !probe.capturing);
}

#[tokio::test]
async fn random_interleavings_never_overlap() {
    for seed in [1, 7, 42, 1234, 99_999] {
        interleave(seed).await;
    }
}

//! Utterance segmentation
//!
//! Energy-based detection of one spoken utterance: waits for speech, keeps
//! accumulating while the speaker talks, and completes after a stretch of
//! trailing silence.

use super::SAMPLE_RATE;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to count as an utterance (0.3s at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (0.8s at 16kHz)
const SILENCE_SAMPLES: usize = 12_800;

/// Hard cap on a single utterance (30s at 16kHz)
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 30;

/// What the latest chunk changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceProgress {
    /// Nothing heard yet
    Waiting,
    /// First speech in this utterance
    SpeechStarted,
    /// Still accumulating
    Continuing,
    /// Enough speech followed by silence; take the buffer
    Complete,
}

/// Detects the boundaries of one utterance in a sample stream
#[derive(Debug, Default)]
pub struct UtteranceDetector {
    speaking: bool,
    speech_buffer: Vec<f32>,
    speech_samples: usize,
    silence_counter: usize,
}

impl UtteranceDetector {
    /// Create a detector waiting for speech
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> UtteranceProgress {
        if samples.is_empty() {
            return if self.speaking {
                UtteranceProgress::Continuing
            } else {
                UtteranceProgress::Waiting
            };
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        if !self.speaking {
            if !is_speech {
                return UtteranceProgress::Waiting;
            }

            self.speaking = true;
            self.speech_buffer.clear();
            self.speech_buffer.extend_from_slice(samples);
            self.speech_samples = samples.len();
            self.silence_counter = 0;
            tracing::trace!(energy, "speech detected");
            return UtteranceProgress::SpeechStarted;
        }

        self.speech_buffer.extend_from_slice(samples);
        if is_speech {
            self.speech_samples += samples.len();
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }

        tracing::trace!(
            buffer_len = self.speech_buffer.len(),
            silence = self.silence_counter,
            is_speech,
            energy,
            "accumulating utterance"
        );

        if self.is_complete() {
            tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
            UtteranceProgress::Complete
        } else {
            UtteranceProgress::Continuing
        }
    }

    /// Enough speech followed by enough silence, or the length cap was reached
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.speaking
            && ((self.silence_counter > SILENCE_SAMPLES
                && self.speech_samples > MIN_SPEECH_SAMPLES)
                || self.speech_buffer.len() >= MAX_UTTERANCE_SAMPLES)
    }

    /// Whether speech has been heard
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Get the accumulated speech buffer
    #[must_use]
    pub fn speech_buffer(&self) -> &[f32] {
        &self.speech_buffer
    }

    /// Take the utterance and reset to waiting
    pub fn take_utterance(&mut self) -> Vec<f32> {
        self.speaking = false;
        self.speech_samples = 0;
        self.silence_counter = 0;
        std::mem::take(&mut self.speech_buffer)
    }

    /// Reset detector to waiting
    pub fn reset(&mut self) {
        self.speaking = false;
        self.speech_buffer.clear();
        self.speech_samples = 0;
        self.silence_counter = 0;
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn tone(seconds: f32) -> Vec<f32> {
        let n = (SAMPLE_RATE as f32 * seconds) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect()
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn silence(seconds: f32) -> Vec<f32> {
        let n = (SAMPLE_RATE as f32 * seconds) as usize;
        vec![0.0; n]
    }

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn silence_keeps_waiting() {
        let mut detector = UtteranceDetector::new();
        assert_eq!(detector.process(&silence(0.5)), UtteranceProgress::Waiting);
        assert!(!detector.is_speaking());
        assert!(detector.speech_buffer().is_empty());
    }

    #[test]
    fn speech_then_silence_completes() {
        let mut detector = UtteranceDetector::new();
        assert_eq!(detector.process(&tone(0.2)), UtteranceProgress::SpeechStarted);
        assert_eq!(detector.process(&tone(0.3)), UtteranceProgress::Continuing);
        assert_eq!(detector.process(&silence(0.5)), UtteranceProgress::Continuing);
        assert_eq!(detector.process(&silence(0.5)), UtteranceProgress::Complete);

        let utterance = detector.take_utterance();
        assert_eq!(utterance.len(), tone(0.5).len() + silence(1.0).len());
        assert!(!detector.is_speaking());
    }

    #[test]
    fn short_blip_does_not_complete() {
        let mut detector = UtteranceDetector::new();
        detector.process(&vec![0.5; 400]);
        assert_eq!(detector.process(&silence(1.0)), UtteranceProgress::Continuing);
        assert!(!detector.is_complete());

        detector.reset();
        assert!(!detector.is_speaking());
    }
}

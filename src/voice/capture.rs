//! Audio capture from microphone

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::{AudioTap, Capture, EventSink, StreamHandle, VoiceEvent};
use crate::error::AdapterError;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Most audio kept in the tap when nobody drains it (30 seconds)
pub const MAX_BUFFERED_SAMPLES: usize = SAMPLE_RATE as usize * 30;

/// Captures audio from the default input device
///
/// The device is opened lazily by [`Capture::start_capture`] and closed again
/// by [`Capture::stop_capture`], so constructing one never touches hardware.
#[derive(Default)]
pub struct AudioCapture {
    stream: Option<Stream>,
    tap: AudioTap,
    stream_id: u64,
}

impl AudioCapture {
    /// Create an idle capture
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn open_stream(&self, sink: EventSink) -> std::result::Result<Stream, AdapterError> {
        let host = cpal::default_host();

        let device = host.default_input_device().ok_or_else(|| {
            AdapterError::DeviceUnavailable("no input device available".to_string())
        })?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| classify(&e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| {
                AdapterError::DeviceUnavailable("no suitable audio config found".to_string())
            })?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        let buffer = Arc::clone(&self.tap);
        let lost = AtomicBool::new(false);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        append_bounded(&mut buf, data);
                    }
                },
                move |err| report_stream_error(&sink, &lost, &err.to_string()),
                None,
            )
            .map_err(|e| classify(&e.to_string()))?;

        stream.play().map_err(|e| classify(&e.to_string()))?;
        Ok(stream)
    }
}

/// Backends only report permission problems in their messages
fn classify(message: &str) -> AdapterError {
    let lower = message.to_lowercase();
    let refused = ["permission", "not authorized", "denied"]
        .iter()
        .any(|needle| lower.contains(needle));
    if refused {
        AdapterError::PermissionDenied(message.to_string())
    } else {
        AdapterError::DeviceUnavailable(message.to_string())
    }
}

/// Append captured audio, dropping the oldest samples past the cap
fn append_bounded(buf: &mut Vec<f32>, data: &[f32]) {
    buf.extend_from_slice(data);
    if buf.len() > MAX_BUFFERED_SAMPLES {
        let excess = buf.len() - MAX_BUFFERED_SAMPLES;
        buf.drain(..excess);
    }
}

/// Turn the first stream error into `CaptureLost`; later ones are only logged
fn report_stream_error(sink: &EventSink, lost: &AtomicBool, message: &str) {
    tracing::error!(error = %message, "audio capture error");
    if !lost.swap(true, Ordering::SeqCst) {
        sink.emit(VoiceEvent::CaptureLost {
            error: AdapterError::DeviceUnavailable(message.to_string()),
        });
    }
}

impl Capture for AudioCapture {
    fn start_capture(
        &mut self,
        sink: EventSink,
    ) -> std::result::Result<StreamHandle, AdapterError> {
        if self.stream.is_none() {
            let stream = self.open_stream(sink)?;
            self.stream = Some(stream);
            self.stream_id += 1;
            tracing::debug!(stream_id = self.stream_id, "audio capture started");
        }

        Ok(StreamHandle::with_tap(self.stream_id, Arc::clone(&self.tap)))
    }

    fn stop_capture(&mut self, handle: StreamHandle) {
        if handle.id() != self.stream_id {
            tracing::trace!(stream_id = handle.id(), "ignoring stop for stale stream");
            return;
        }

        if let Some(stream) = self.stream.take() {
            drop(stream);
            handle.clear();
            tracing::debug!(stream_id = handle.id(), "audio capture stopped");
        }
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Event;

    #[test]
    fn permission_messages_are_permanent() {
        assert!(classify("Permission denied by user").is_permanent());
        assert!(!classify("device disconnected").is_permanent());
    }

    #[test]
    fn tap_keeps_only_the_latest_window() {
        let mut buf = Vec::new();
        let second = vec![0.25; SAMPLE_RATE as usize];

        for _ in 0..45 {
            append_bounded(&mut buf, &second);
        }
        append_bounded(&mut buf, &[0.5, 0.75]);

        assert_eq!(buf.len(), MAX_BUFFERED_SAMPLES);
        assert!(buf.ends_with(&[0.5, 0.75]));
    }

    #[test]
    fn stream_error_is_reported_once_as_capture_lost() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let lost = AtomicBool::new(false);

        report_stream_error(&sink, &lost, "device disconnected");
        report_stream_error(&sink, &lost, "device disconnected");

        assert!(matches!(
            rx.try_recv(),
            Ok(Event::Voice(VoiceEvent::CaptureLost {
                error: AdapterError::DeviceUnavailable(_)
            }))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stale_stop_is_ignored() {
        let mut capture = AudioCapture::new();
        capture.stop_capture(StreamHandle::new(99));
        assert!(!capture.is_capturing());
    }
}

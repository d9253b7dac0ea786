//! Audio playback to speakers
//!
//! Playback blocks the calling thread until the samples are played or the
//! cancel flag is raised. Callers on the async runtime run it through
//! `spawn_blocking`; cpal streams never leave the thread that built them.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::error::AdapterError;

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// How often the playing thread checks for completion or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Open the default output device at the playback rate, mono or stereo
fn output_config(device: &cpal::Device) -> Result<StreamConfig, AdapterError> {
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels
            && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| AdapterError::SynthesisError(e.to_string()))?
        .find(|c| supports(c, 1))
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports(c, 2))
        })
        .ok_or_else(|| {
            AdapterError::SynthesisError("no suitable output config found".to_string())
        })?;

    Ok(supported
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config())
}

/// Play mono f32 samples at the playback rate
///
/// Returns early, without error, once `cancel` is set.
///
/// # Errors
///
/// Returns error if no output device can be opened
pub fn play_samples_blocking(samples: Vec<f32>, cancel: &AtomicBool) -> Result<(), AdapterError> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AdapterError::SynthesisError("no output device".to_string()))?;
    let config = output_config(&device)?;
    let channels = config.channels as usize;

    let sample_count = samples.len();
    let finished = Arc::new(AtomicBool::new(false));
    let finished_cb = Arc::clone(&finished);
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(position).copied().unwrap_or_else(|| {
                        finished_cb.store(true, Ordering::Release);
                        0.0
                    });
                    frame.fill(sample);
                    if position < samples.len() {
                        position += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| AdapterError::SynthesisError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AdapterError::SynthesisError(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while !finished.load(Ordering::Acquire) {
        if cancel.load(Ordering::Acquire) {
            tracing::debug!("playback cancelled");
            return Ok(());
        }
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");
    Ok(())
}

/// Decode MP3 bytes and play them
///
/// # Errors
///
/// Returns error if decoding or playback fails
pub fn play_mp3_blocking(mp3_data: &[u8], cancel: &AtomicBool) -> Result<(), AdapterError> {
    let samples = decode_mp3(mp3_data)?;
    play_samples_blocking(samples, cancel)
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>, AdapterError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(AdapterError::SynthesisError(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

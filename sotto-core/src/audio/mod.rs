//! Audio capture via cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory (after the one-time mix buffer reaches steady size)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by writing directly into an SPSC ring
//! buffer producer whose `push_slice` is lock-free and allocation-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` therefore must be created and dropped on the same
//! thread. The pipeline accomplishes this by calling `open_default` inside
//! `tokio::task::spawn_blocking`.

pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::{
    buffering::AudioProducer,
    error::{Result, SottoError},
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active audio capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — set to `false` to signal the callback to no-op.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open the system default microphone and push f32 PCM into `producer`.
    ///
    /// The device's own sample rate is kept; the pipeline resamples to its
    /// fixed rate downstream. i16 devices are normalized by dividing by
    /// 32768; multi-channel devices are downmixed to mono in the callback.
    ///
    /// Must be called from the thread that will also drop this value.
    ///
    /// # Errors
    /// Returns `SottoError::NoDefaultInputDevice` when no microphone is
    /// available, or `SottoError::AudioStream` if cpal fails to build the
    /// stream or reports a sample format other than f32/i16.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(mut producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(SottoError::NoDefaultInputDevice)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| SottoError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let ch = channels as usize;
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        if ch == 1 {
                            let written = producer.push_slice(data);
                            if written < data.len() {
                                warn!(
                                    "ring buffer full: dropped {} f32 frames",
                                    data.len() - written
                                );
                            }
                            return;
                        }

                        let frames = data.len() / ch;
                        mix_buf.resize(frames, 0.0);
                        for f in 0..frames {
                            let base = f * ch;
                            let sum: f32 = data[base..base + ch].iter().sum();
                            mix_buf[f] = sum / ch as f32;
                        }
                        let written = producer.push_slice(&mix_buf);
                        if written < mix_buf.len() {
                            warn!(
                                "ring buffer full: dropped {} f32 frames",
                                mix_buf.len() - written
                            );
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let ch = channels as usize;
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        let frames = data.len() / ch;
                        mix_buf.resize(frames, 0.0);
                        if ch == 1 {
                            for (idx, sample) in data.iter().take(frames).enumerate() {
                                mix_buf[idx] = *sample as f32 / 32768.0;
                            }
                        } else {
                            for f in 0..frames {
                                let base = f * ch;
                                let sum: f32 = data[base..base + ch]
                                    .iter()
                                    .map(|s| *s as f32 / 32768.0)
                                    .sum();
                                mix_buf[f] = sum / ch as f32;
                            }
                        }
                        let written = producer.push_slice(&mix_buf);
                        if written < mix_buf.len() {
                            warn!(
                                "ring buffer full: dropped {} i16 frames",
                                mix_buf.len() - written
                            );
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(SottoError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| SottoError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SottoError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Stub when the `audio-cpal` feature is disabled.
    #[cfg(not(feature = "audio-cpal"))]
    pub fn open_default(_producer: AudioProducer, _running: Arc<AtomicBool>) -> Result<Self> {
        Err(SottoError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

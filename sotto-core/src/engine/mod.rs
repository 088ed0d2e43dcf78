//! `SottoEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! SottoEngine::new()
//!     └─► start()        → audio open, pipeline spawned, status = Listening
//!         └─► stop()     → running=false, stream dropped, status = Stopped
//! ```
//!
//! `start()`/`stop()` are idempotent: calling them in the wrong state returns
//! an error rather than panicking. Restarting builds a fresh processing step,
//! so the warm-up counter, gate state, and utterance buffer all reset.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `AudioCapture` is therefore created *inside* the
//! `spawn_blocking` closure so it never crosses a thread boundary. A sync
//! oneshot channel propagates any open-device errors back to the `start()`
//! caller.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::AudioCapture,
    buffering::create_audio_ring,
    error::{Result, SottoError},
    ipc::events::{
        EngineStatus, EngineStatusEvent, LevelEvent, SpectrumEvent, SpeechEvent, Utterance,
    },
    vad::Threshold,
};

/// Broadcast channel capacity: events buffered for slow consumers before
/// the oldest are dropped.
const BROADCAST_CAP: usize = 256;

/// Configuration for `SottoEngine`.
///
/// Everything here is fixed at construction; the speech threshold alone is
/// runtime-mutable, through [`SottoEngine::set_threshold`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed pipeline sample rate (Hz). Audio captured at other rates is
    /// resampled. Default: 16000.
    pub target_sample_rate: u32,
    /// Transform window length in samples; also the per-iteration drain
    /// size. Default: 1024.
    pub window_size: usize,
    /// Low spectrum bins skipped when computing the loudness metric, so DC
    /// and rumble never drive the speech decision. Default: 10.
    pub bin_skip: usize,
    /// Initial speech threshold compared against the loudness metric.
    /// Default: 4.0.
    pub threshold: f64,
    /// How long loudness must hold at or below threshold before an
    /// utterance is closed. Default: 1 s.
    pub debounce: Duration,
    /// Frames discarded after device open to suppress startup transients.
    /// Default: 10.
    pub warmup_frames: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            window_size: 1024,
            bin_skip: 10,
            threshold: 4.0,
            debounce: Duration::from_millis(1_000),
            warmup_frames: 10,
        }
    }
}

/// The top-level engine handle.
///
/// `SottoEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<SottoEngine>` to share between an app shell and
/// event-forwarding async tasks.
pub struct SottoEngine {
    config: EngineConfig,
    /// `true` while capture + pipeline are active.
    running: Arc<AtomicBool>,
    /// Canonical status (written under the Mutex, read from commands).
    status: Arc<Mutex<EngineStatus>>,
    /// Runtime-mutable speech threshold, shared with the pipeline worker.
    threshold: Threshold,
    spectrum_tx: broadcast::Sender<SpectrumEvent>,
    level_tx: broadcast::Sender<LevelEvent>,
    speech_tx: broadcast::Sender<SpeechEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Utterance handoff to the transcription consumer.
    utterance_tx: crossbeam_channel::Sender<Utterance>,
    utterance_rx: crossbeam_channel::Receiver<Utterance>,
    /// Monotonically increasing event sequence counter.
    seq: Arc<AtomicU64>,
    /// Shared pipeline diagnostics counters.
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
}

impl SottoEngine {
    /// Create a new engine. Does not start capturing — call `start()`.
    pub fn new(config: EngineConfig) -> Self {
        let (spectrum_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (level_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (speech_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (utterance_tx, utterance_rx) = crossbeam_channel::unbounded();
        let threshold = Threshold::new(config.threshold);

        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            threshold,
            spectrum_tx,
            level_tx,
            speech_tx,
            status_tx,
            utterance_tx,
            utterance_rx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
        }
    }

    /// Start audio capture and the pipeline.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns. The pipeline continues running in a background blocking
    /// thread.
    ///
    /// # Errors
    /// - `SottoError::AlreadyRunning` if already started.
    /// - `SottoError::SpectrumPlan` if the transform plan cannot be built.
    /// - `SottoError::NoDefaultInputDevice` / `SottoError::AudioStream` on
    ///   device errors.
    pub fn start(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SottoError::AlreadyRunning);
        }

        // Fail fast: without the spectrum plan the pipeline cannot run.
        let processor = pipeline::FrameProcessor::new(
            &self.config,
            self.threshold.clone(),
            pipeline::EventSenders {
                spectrum: self.spectrum_tx.clone(),
                level: self.level_tx.clone(),
                speech: self.speech_tx.clone(),
                utterances: self.utterance_tx.clone(),
            },
            Arc::clone(&self.seq),
            Arc::clone(&self.diagnostics),
        )?;

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);
        self.set_status(EngineStatus::Listening, None);

        let (producer, consumer) = create_audio_ring();

        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let diagnostics = Arc::clone(&self.diagnostics);

        // Sync oneshot: pipeline thread signals open success/failure to
        // start(). Carries the actual capture sample rate on success.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // Open the device on THIS thread — cpal::Stream is !Send.
            let capture = match AudioCapture::open_default(producer, Arc::clone(&running)) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let capture_sample_rate = capture.sample_rate;

            pipeline::run(pipeline::PipelineContext {
                config,
                processor,
                consumer,
                running,
                capture_sample_rate,
                diagnostics,
            });

            // Stream drops here, releasing the audio device on this thread.
            drop(capture);
        });

        match open_rx.recv() {
            Ok(Ok(_rate)) => {
                info!("engine started — listening");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — spawn_blocking panicked?
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("pipeline failed to start".into()));
                Err(SottoError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Stop audio capture and the pipeline.
    ///
    /// The worker cancels any pending debounce deadline, closes an utterance
    /// only if speech was active, and releases the device and transform
    /// resources on its own thread.
    ///
    /// # Errors
    /// - `SottoError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SottoError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Stopped, None);
        info!("engine stop requested");
        Ok(())
    }

    /// Update the speech threshold. Takes effect on the next processed frame.
    pub fn set_threshold(&self, value: f64) {
        self.threshold.set(value);
    }

    /// Current speech threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold.get()
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to per-frame magnitude spectra (visualization).
    pub fn subscribe_spectrum(&self) -> broadcast::Receiver<SpectrumEvent> {
        self.spectrum_tx.subscribe()
    }

    /// Subscribe to per-frame loudness levels (meters).
    pub fn subscribe_levels(&self) -> broadcast::Receiver<LevelEvent> {
        self.level_tx.subscribe()
    }

    /// Subscribe to speech boundary events.
    pub fn subscribe_speech(&self) -> broadcast::Receiver<SpeechEvent> {
        self.speech_tx.subscribe()
    }

    /// Subscribe to engine status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Receiver handed to the transcription consumer. Each flushed utterance
    /// is delivered exactly once across all clones.
    pub fn utterances(&self) -> crossbeam_channel::Receiver<Utterance> {
        self.utterance_rx.clone()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

//! Blocking pipeline loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → up to one window of f32 samples
//! 2. Resample to the pipeline rate (passthrough for 16 kHz devices)
//! 3. Warm-up filter — discard device-open transients
//! 4. SpectrumAnalyzer → magnitudes + loudness   → SpectrumEvent, LevelEvent
//! 5. SpeechGate transitions                     → SpeechEvent
//! 6. UtteranceBuffer accumulate; flush on confirmed silence → Utterance
//! ```
//!
//! The entire loop runs in `spawn_blocking`. The debounce deadline is polled
//! on this same thread — at the top of every processing step and whenever the
//! ring is empty — so gate mutation never races frame processing and no
//! internal locking is needed.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, Span};

use crate::{
    audio::resample::RateConverter,
    buffering::{frame::AudioFrame, utterance::UtteranceBuffer, AudioConsumer, Consumer},
    engine::EngineConfig,
    error::Result,
    ipc::events::{LevelEvent, SpectrumEvent, SpeechBoundary, SpeechEvent, Utterance},
    spectrum::SpectrumAnalyzer,
    vad::{warmup::WarmupFilter, GateTransition, SpeechGate, Threshold},
};

pub struct PipelineDiagnostics {
    pub samples_in: AtomicUsize,
    pub samples_converted: AtomicUsize,
    pub frames_discarded: AtomicUsize,
    pub frames_analyzed: AtomicUsize,
    pub speech_frames: AtomicUsize,
    pub utterances_flushed: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            samples_in: AtomicUsize::new(0),
            samples_converted: AtomicUsize::new(0),
            frames_discarded: AtomicUsize::new(0),
            frames_analyzed: AtomicUsize::new(0),
            speech_frames: AtomicUsize::new(0),
            utterances_flushed: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_converted.store(0, Ordering::Relaxed);
        self.frames_discarded.store(0, Ordering::Relaxed);
        self.frames_analyzed.store(0, Ordering::Relaxed);
        self.speech_frames.store(0, Ordering::Relaxed);
        self.utterances_flushed.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_converted: self.samples_converted.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            speech_frames: self.speech_frames.load(Ordering::Relaxed),
            utterances_flushed: self.utterances_flushed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub samples_converted: usize,
    pub frames_discarded: usize,
    pub frames_analyzed: usize,
    pub speech_frames: usize,
    pub utterances_flushed: usize,
}

/// Sender halves for everything the processing step emits.
pub struct EventSenders {
    pub spectrum: broadcast::Sender<SpectrumEvent>,
    pub level: broadcast::Sender<LevelEvent>,
    pub speech: broadcast::Sender<SpeechEvent>,
    /// Single-consumer handoff; each flushed utterance is moved exactly once.
    pub utterances: crossbeam_channel::Sender<Utterance>,
}

/// The per-frame processing step, independent of the capture transport.
///
/// Owns every stage that mutates state — warm-up filter, analyzer, gate, and
/// utterance buffer — so it can be driven directly by tests and by the
/// offline WAV driver with synthetic timestamps.
pub struct FrameProcessor {
    warmup: WarmupFilter,
    analyzer: SpectrumAnalyzer,
    gate: SpeechGate,
    buffer: UtteranceBuffer,
    senders: EventSenders,
    window_size: usize,
    sample_rate: u32,
    seq: Arc<AtomicU64>,
    next_utterance_id: u64,
    utterance_span: Option<Span>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl FrameProcessor {
    /// Build the processing step for one capture session.
    ///
    /// # Errors
    /// Fails when the spectrum plan cannot be built for the configured
    /// window — fatal, the pipeline cannot run without it.
    pub fn new(
        config: &EngineConfig,
        threshold: Threshold,
        senders: EventSenders,
        seq: Arc<AtomicU64>,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Result<Self> {
        Ok(Self {
            warmup: WarmupFilter::new(config.warmup_frames),
            analyzer: SpectrumAnalyzer::new(config.window_size, config.bin_skip)?,
            gate: SpeechGate::new(threshold, config.debounce),
            buffer: UtteranceBuffer::new(),
            senders,
            window_size: config.window_size,
            sample_rate: config.target_sample_rate,
            seq,
            next_utterance_id: 0,
            utterance_span: None,
            diagnostics,
        })
    }

    /// Check the debounce deadline; closes the utterance when it expires.
    ///
    /// Called at the start of every processing step and by the worker loop
    /// whenever no audio is pending, so end-of-speech confirmation never
    /// waits for another frame.
    pub fn poll(&mut self, now: Instant) {
        if let Some(transition) = self.gate.poll(now) {
            self.apply(transition);
        }
    }

    /// Process one arriving frame.
    ///
    /// An empty frame is silently ignored: no state change, no events.
    /// Frames longer than the window are truncated; shorter frames are
    /// analyzed against a zero-padded window.
    pub fn process(&mut self, frame: &AudioFrame, now: Instant) {
        if frame.is_empty() {
            return;
        }

        self.poll(now);

        if !self.warmup.admit() {
            self.diagnostics
                .frames_discarded
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Some(spectrum) = self.analyzer.analyze(&frame.samples) else {
            return;
        };
        self.diagnostics
            .frames_analyzed
            .fetch_add(1, Ordering::Relaxed);

        let loudness = spectrum.loudness;
        let transition = self.gate.observe(loudness, now);

        let _ = self.senders.spectrum.send(SpectrumEvent {
            seq: self.next_seq(),
            magnitudes: spectrum.magnitudes,
            peak: spectrum.peak,
        });
        let _ = self.senders.level.send(LevelEvent {
            seq: self.next_seq(),
            loudness,
            speaking: self.gate.is_speaking(),
        });

        if let Some(transition) = transition {
            self.apply(transition);
        }

        if self.gate.accumulating() {
            let take = frame.samples.len().min(self.window_size);
            self.buffer.append(&frame.samples[..take]);
            self.diagnostics
                .speech_frames
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Terminal close on capture stop.
    ///
    /// Flushes and emits a stop only when speech was confirmed active or
    /// tentatively ending; a session stopping in confirmed silence emits
    /// nothing.
    pub fn finish(&mut self, now: Instant) {
        self.poll(now);
        if self.gate.accumulating() {
            info!(
                samples = self.buffer.len(),
                "capture stopping mid-speech — closing utterance"
            );
            self.close_utterance();
        }
        self.gate.reset();
    }

    fn apply(&mut self, transition: GateTransition) {
        match transition {
            GateTransition::Started { resumed } => {
                if resumed {
                    if let Some(ref span) = self.utterance_span {
                        let _enter = span.enter();
                        debug!(samples = self.buffer.len(), "dip bridged — same utterance");
                    }
                } else {
                    // Genuine new utterance after confirmed silence: drop any
                    // leftovers before accumulation resumes.
                    self.buffer.clear();
                    let id = self.next_utterance_id;
                    self.next_utterance_id += 1;
                    let span = info_span!(
                        "utterance",
                        utterance_id = id,
                        sample_rate = self.sample_rate,
                    );
                    {
                        let _enter = span.enter();
                        debug!("speech started");
                    }
                    self.utterance_span = Some(span);
                }
                let _ = self.senders.speech.send(SpeechEvent {
                    seq: self.next_seq(),
                    boundary: SpeechBoundary::Started,
                });
            }
            GateTransition::Stopped => self.close_utterance(),
        }
    }

    fn close_utterance(&mut self) {
        let _ = self.senders.speech.send(SpeechEvent {
            seq: self.next_seq(),
            boundary: SpeechBoundary::Stopped,
        });

        let utterance = Utterance {
            seq: self.next_seq(),
            samples: self.buffer.flush(),
            sample_rate: self.sample_rate,
        };

        if let Some(span) = self.utterance_span.take() {
            let _enter = span.enter();
            info!(
                samples = utterance.samples.len(),
                duration_secs = format_args!("{:.2}", utterance.duration_secs()),
                "utterance closed"
            );
        }

        let _ = self.senders.utterances.send(utterance);
        self.diagnostics
            .utterances_flushed
            .fetch_add(1, Ordering::Relaxed);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub processor: FrameProcessor,
    pub consumer: AudioConsumer,
    pub running: Arc<std::sync::atomic::AtomicBool>,
    pub capture_sample_rate: u32,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY_MS: u64 = 5;

/// Run the blocking pipeline until `ctx.running` becomes false.
pub fn run(mut ctx: PipelineContext) {
    info!("pipeline started");

    // Converter from the device rate to the fixed pipeline rate
    // (passthrough when they already match).
    let mut converter = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.config.target_sample_rate,
        ctx.config.window_size,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to create rate converter: {e}");
            return;
        }
    };

    // Scratch drain buffer, reused each iteration.
    let mut raw = vec![0f32; ctx.config.window_size];

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let n = ctx.consumer.pop_slice(&mut raw);

        if n == 0 {
            // No audio pending — the debounce deadline still has to fire.
            ctx.processor.poll(Instant::now());
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }

        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        let converted = converter.convert(&raw[..n]);
        if converted.is_empty() {
            // Partial block — waiting for more input to fill the converter.
            continue;
        }
        ctx.diagnostics
            .samples_converted
            .fetch_add(converted.len(), Ordering::Relaxed);

        let frame = AudioFrame::new(converted, ctx.config.target_sample_rate);
        ctx.processor.process(&frame, Instant::now());
    }

    ctx.processor.finish(Instant::now());

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        samples_converted = snap.samples_converted,
        frames_discarded = snap.frames_discarded,
        frames_analyzed = snap.frames_analyzed,
        speech_frames = snap.speech_frames,
        utterances_flushed = snap.utterances_flushed,
        "pipeline stopped — diagnostics"
    );
}

//! End-to-end flow through the blocking worker loop: ring buffer in,
//! speech events and a flushed utterance out.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use sotto_core::buffering::{create_audio_ring, Producer};
use sotto_core::engine::pipeline::{
    self, EventSenders, FrameProcessor, PipelineContext, PipelineDiagnostics,
};
use sotto_core::ipc::events::{SpeechBoundary, SpeechEvent, Utterance};
use sotto_core::vad::Threshold;
use sotto_core::EngineConfig;

const WINDOW: usize = 1024;
const RATE: u32 = 16_000;

/// Unit-amplitude sinusoid on spectrum bin 50 — loudness ≈ 512, far above
/// the default 4.0 threshold.
fn tone(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * 50.0 * i as f64 / WINDOW as f64;
            phase.sin() as f32
        })
        .collect()
}

struct RunningPipeline {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
    speech_rx: broadcast::Receiver<SpeechEvent>,
    utterance_rx: crossbeam_channel::Receiver<Utterance>,
    diagnostics: Arc<PipelineDiagnostics>,
}

fn spawn_pipeline(config: EngineConfig, threshold: Threshold, audio: &[Vec<f32>]) -> RunningPipeline {
    let (mut producer, consumer) = create_audio_ring();
    for frame in audio {
        producer.push_slice(frame);
    }

    let (spectrum_tx, _) = broadcast::channel(256);
    let (level_tx, _) = broadcast::channel(256);
    let (speech_tx, speech_rx) = broadcast::channel(256);
    let (utterance_tx, utterance_rx) = crossbeam_channel::unbounded();
    let diagnostics = Arc::new(PipelineDiagnostics::default());

    let processor = FrameProcessor::new(
        &config,
        threshold,
        EventSenders {
            spectrum: spectrum_tx,
            level: level_tx,
            speech: speech_tx,
            utterances: utterance_tx,
        },
        Arc::new(AtomicU64::new(0)),
        Arc::clone(&diagnostics),
    )
    .expect("spectrum plan builds for the default window");

    let running = Arc::new(AtomicBool::new(true));
    let ctx = PipelineContext {
        config,
        processor,
        consumer,
        running: Arc::clone(&running),
        capture_sample_rate: RATE,
        diagnostics: Arc::clone(&diagnostics),
    };

    let handle = thread::spawn(move || pipeline::run(ctx));

    RunningPipeline {
        running,
        handle,
        speech_rx,
        utterance_rx,
        diagnostics,
    }
}

fn drain_boundaries(rx: &mut broadcast::Receiver<SpeechEvent>) -> Vec<SpeechBoundary> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev.boundary),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return out,
        }
    }
}

#[test]
fn speech_burst_flushes_one_utterance_after_the_debounce() {
    let config = EngineConfig {
        warmup_frames: 2,
        debounce: Duration::from_millis(80),
        ..EngineConfig::default()
    };

    // Two warm-up frames (discarded), three tone frames, one trailing quiet
    // frame that arms the deadline. Silence confirmation must then come from
    // the idle loop — no further audio arrives.
    let mut audio = vec![vec![0.0f32; WINDOW]; 2];
    audio.extend(std::iter::repeat_with(|| tone(WINDOW)).take(3));
    audio.push(vec![0.0f32; WINDOW]);

    let start = Instant::now();
    let mut p = spawn_pipeline(config, Threshold::new(4.0), &audio);

    let utterance = p
        .utterance_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("utterance flushed after debounce");
    let elapsed = start.elapsed();

    p.running.store(false, Ordering::SeqCst);
    p.handle.join().expect("pipeline thread panicked");

    // Three tone frames plus the quiet frame inside the pending window.
    assert_eq!(utterance.samples.len(), 4 * WINDOW);
    assert_eq!(utterance.sample_rate, RATE);
    assert!(
        elapsed >= Duration::from_millis(80),
        "flush cannot precede the debounce window: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(1),
        "silence confirmation took too long: {elapsed:?}"
    );

    assert_eq!(
        drain_boundaries(&mut p.speech_rx),
        vec![SpeechBoundary::Started, SpeechBoundary::Stopped]
    );

    let snap = p.diagnostics.snapshot();
    assert_eq!(snap.frames_discarded, 2);
    assert_eq!(snap.utterances_flushed, 1);
}

#[test]
fn raised_threshold_suppresses_detection_entirely() {
    let config = EngineConfig {
        warmup_frames: 0,
        debounce: Duration::from_millis(50),
        ..EngineConfig::default()
    };

    // Threshold far above the tone's ≈512 loudness: the gate never opens.
    let threshold = Threshold::new(10_000.0);
    let audio: Vec<Vec<f32>> = std::iter::repeat_with(|| tone(WINDOW)).take(5).collect();

    let mut p = spawn_pipeline(config, threshold, &audio);

    assert!(
        p.utterance_rx
            .recv_timeout(Duration::from_millis(300))
            .is_err(),
        "no utterance may be flushed below threshold"
    );

    p.running.store(false, Ordering::SeqCst);
    p.handle.join().expect("pipeline thread panicked");

    assert!(drain_boundaries(&mut p.speech_rx).is_empty());
    assert_eq!(p.diagnostics.snapshot().speech_frames, 0);
    assert_eq!(p.diagnostics.snapshot().frames_analyzed, 5);
}

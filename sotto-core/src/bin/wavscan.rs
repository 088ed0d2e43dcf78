//! Offline driver: run the voice pipeline over a WAV file and print detected
//! speech boundaries and flushed utterances as JSON lines.
//!
//! Lets the gating behavior be inspected and tuned without a microphone:
//!
//! ```text
//! wavscan recording.wav --threshold 4.0 --debounce-ms 1000
//! ```

fn main() {
    if let Err(e) = run() {
        eprintln!("wavscan failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use sotto_core::audio::resample::RateConverter;
    use sotto_core::buffering::frame::AudioFrame;
    use sotto_core::engine::pipeline::{EventSenders, FrameProcessor, PipelineDiagnostics};
    use sotto_core::ipc::events::SpeechBoundary;
    use sotto_core::vad::Threshold;
    use sotto_core::EngineConfig;
    use tokio::sync::broadcast;

    struct Args {
        input: PathBuf,
        threshold: f64,
        debounce_ms: u64,
        warmup_frames: u32,
    }

    fn parse_args() -> Result<Args, String> {
        let mut input: Option<PathBuf> = None;
        let mut threshold = 4.0f64;
        let mut debounce_ms = 1_000u64;
        // A file has no device-open transient, so nothing is discarded by default.
        let mut warmup_frames = 0u32;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--threshold" => {
                    let v = it.next().ok_or("--threshold requires a value")?;
                    threshold = v.parse().map_err(|e| format!("bad --threshold: {e}"))?;
                }
                "--debounce-ms" => {
                    let v = it.next().ok_or("--debounce-ms requires a value")?;
                    debounce_ms = v.parse().map_err(|e| format!("bad --debounce-ms: {e}"))?;
                }
                "--warmup" => {
                    let v = it.next().ok_or("--warmup requires a value")?;
                    warmup_frames = v.parse().map_err(|e| format!("bad --warmup: {e}"))?;
                }
                other if input.is_none() => input = Some(PathBuf::from(other)),
                other => return Err(format!("unexpected argument: {other}")),
            }
        }

        Ok(Args {
            input: input.ok_or("usage: wavscan <file.wav> [--threshold N] [--debounce-ms N] [--warmup N]")?,
            threshold,
            debounce_ms,
            warmup_frames,
        })
    }

    /// Load a WAV file as mono f32: i16 samples are normalized by /32768,
    /// multi-channel files are averaged down to one channel.
    fn load_wav(path: &std::path::Path) -> Result<(Vec<f32>, u32), String> {
        let mut reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| e.to_string())?,
            hound::SampleFormat::Int => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<_, _>>()
                .map_err(|e| e.to_string())?,
        };

        let channels = spec.channels as usize;
        if channels <= 1 {
            return Ok((interleaved, spec.sample_rate));
        }

        let mono = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Ok((mono, spec.sample_rate))
    }

    let args = parse_args()?;

    let config = EngineConfig {
        threshold: args.threshold,
        debounce: Duration::from_millis(args.debounce_ms),
        warmup_frames: args.warmup_frames,
        ..EngineConfig::default()
    };

    let (samples, wav_rate) = load_wav(&args.input)?;

    // Bring file audio onto the pipeline rate, exactly as live capture would.
    let mut converter = RateConverter::new(wav_rate, config.target_sample_rate, config.window_size)
        .map_err(|e| e.to_string())?;

    let (spectrum_tx, _spectrum_rx) = broadcast::channel(1024);
    let (level_tx, _level_rx) = broadcast::channel(1024);
    let (speech_tx, mut speech_rx) = broadcast::channel(1024);
    let (utterance_tx, utterance_rx) = crossbeam_channel::unbounded();
    let diagnostics = Arc::new(PipelineDiagnostics::default());

    let mut processor = FrameProcessor::new(
        &config,
        Threshold::new(config.threshold),
        EventSenders {
            spectrum: spectrum_tx,
            level: level_tx,
            speech: speech_tx,
            utterances: utterance_tx,
        },
        Arc::new(AtomicU64::new(0)),
        Arc::clone(&diagnostics),
    )
    .map_err(|e| e.to_string())?;

    // Synthetic clock: frame timestamps follow the sample clock of the file
    // rather than wall time, so debounce behaves as it would live.
    let base = Instant::now();
    let rate = config.target_sample_rate as f64;
    let mut fed = 0usize;

    let emit_pending =
        |speech_rx: &mut broadcast::Receiver<sotto_core::SpeechEvent>,
         utterance_rx: &crossbeam_channel::Receiver<sotto_core::Utterance>,
         time_secs: f64| {
            while let Ok(ev) = speech_rx.try_recv() {
                let kind = match ev.boundary {
                    SpeechBoundary::Started => "started",
                    SpeechBoundary::Stopped => "stopped",
                };
                println!(
                    "{}",
                    serde_json::json!({ "event": kind, "seq": ev.seq, "timeSecs": time_secs })
                );
            }
            while let Ok(utterance) = utterance_rx.try_recv() {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "utterance",
                        "seq": utterance.seq,
                        "samples": utterance.samples.len(),
                        "durationSecs": utterance.duration_secs(),
                    })
                );
            }
        };

    for chunk in samples.chunks(config.window_size) {
        let converted = converter.convert(chunk);
        if converted.is_empty() {
            continue;
        }
        let time_secs = fed as f64 / rate;
        let now = base + Duration::from_secs_f64(time_secs);
        fed += converted.len();

        processor.process(&AudioFrame::new(converted, config.target_sample_rate), now);
        emit_pending(&mut speech_rx, &utterance_rx, time_secs);
    }

    // Give a trailing silence its debounce window, then close anything still
    // open at end-of-file.
    let end_secs = fed as f64 / rate;
    let tail = base + Duration::from_secs_f64(end_secs) + config.debounce + Duration::from_millis(1);
    processor.poll(tail);
    processor.finish(tail);
    emit_pending(&mut speech_rx, &utterance_rx, end_secs);

    let snap = diagnostics.snapshot();
    println!(
        "{}",
        serde_json::json!({
            "event": "summary",
            "file": args.input.display().to_string(),
            "wavSampleRate": wav_rate,
            "framesAnalyzed": snap.frames_analyzed,
            "framesDiscarded": snap.frames_discarded,
            "speechFrames": snap.speech_frames,
            "utterances": snap.utterances_flushed,
        })
    );

    Ok(())
}

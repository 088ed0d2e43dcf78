//! # sotto-core
//!
//! Voice front-end SDK: microphone capture, per-frame spectral analysis, and
//! speech gating with a debounced end-of-utterance decision.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Pipeline(spawn_blocking)
//!                                                    │
//!                                    SpectrumAnalyzer (magnitudes + loudness)
//!                                                    │
//!                                      SpeechGate (hysteresis + debounce)
//!                                                    │
//!                    broadcast events + crossbeam Sender<Utterance> (flush)
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens on the pipeline thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod spectrum;
pub mod vad;

// Convenience re-exports for downstream crates
pub use engine::{EngineConfig, SottoEngine};
pub use error::SottoError;
pub use ipc::events::{
    EngineStatus, EngineStatusEvent, LevelEvent, SpectrumEvent, SpeechBoundary, SpeechEvent,
    Utterance,
};
pub use vad::Threshold;

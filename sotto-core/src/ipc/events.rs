//! Event types emitted to the UI and transcription collaborators.
//!
//! ## Channel names
//!
//! | Event | Channel |
//! |-------|---------|
//! | `SpectrumEvent` | `"sotto://spectrum"` |
//! | `LevelEvent` | `"sotto://level"` |
//! | `SpeechEvent` | `"sotto://speech"` |
//! | `EngineStatusEvent` | `"sotto://status"` |
//!
//! `Utterance` does not cross an IPC boundary: it is handed to the
//! transcription consumer over an in-process channel as a single ownership
//! transfer.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Visualization events
// ---------------------------------------------------------------------------

/// Emitted on channel `"sotto://spectrum"` once per analyzed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Non-negative magnitudes, `window_size / 2` entries, DC bin first.
    pub magnitudes: Vec<f64>,
    /// Session-wide peak magnitude, for display scaling only.
    pub peak: f64,
}

/// Emitted on channel `"sotto://level"` once per analyzed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Loudness metric for the frame (peak magnitude beyond the skip offset).
    pub loudness: f64,
    /// Gate state after judging this frame.
    pub speaking: bool,
}

// ---------------------------------------------------------------------------
// Speech boundary events
// ---------------------------------------------------------------------------

/// Emitted on channel `"sotto://speech"` when the gate crosses a boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub boundary: SpeechBoundary,
}

/// Which side of an utterance a `SpeechEvent` marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechBoundary {
    /// Loudness crossed above threshold (a new utterance, or a bridged dip
    /// resuming the current one).
    Started,
    /// Silence held for the full debounce window; the utterance is closed.
    Stopped,
}

/// One flushed utterance, from confirmed start to confirmed stop.
///
/// Sent exactly once per speech region; the sample buffer is moved to the
/// consumer and never touched again by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Mono f32 samples at `sample_rate`, bridged dips included.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl Utterance {
    /// Duration of the captured region in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted on channel `"sotto://status"` when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the Sotto engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Actively capturing audio and gating speech.
    Listening,
    /// Capture stopped; engine may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_event_serializes_with_lowercase_boundary() {
        let event = SpeechEvent {
            seq: 4,
            boundary: SpeechBoundary::Started,
        };

        let json = serde_json::to_value(&event).expect("serialize speech event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["boundary"], "started");

        let round_trip: SpeechEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(round_trip.boundary, SpeechBoundary::Started);
    }

    #[test]
    fn speech_boundary_rejects_non_lowercase_values() {
        let invalid = r#""Stopped""#;
        assert!(serde_json::from_str::<SpeechBoundary>(invalid).is_err());
    }

    #[test]
    fn level_event_serializes_with_camel_case_fields() {
        let event = LevelEvent {
            seq: 9,
            loudness: 512.0,
            speaking: true,
        };

        let json = serde_json::to_value(&event).expect("serialize level event");
        assert_eq!(json["seq"], 9);
        let loudness = json["loudness"].as_f64().expect("loudness is a number");
        assert!((loudness - 512.0).abs() < 1e-9);
        assert_eq!(json["speaking"], true);
    }

    #[test]
    fn spectrum_event_round_trips() {
        let event = SpectrumEvent {
            seq: 1,
            magnitudes: vec![0.0, 1.5, 3.25],
            peak: 3.25,
        };

        let json = serde_json::to_value(&event).expect("serialize spectrum event");
        let round_trip: SpectrumEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(round_trip.magnitudes.len(), 3);
        assert!((round_trip.peak - 3.25).abs() < 1e-9);
    }

    #[test]
    fn utterance_reports_duration_from_sample_rate() {
        let utterance = Utterance {
            seq: 0,
            samples: vec![0.0; 32_000],
            sample_rate: 16_000,
        };
        assert!((utterance.duration_secs() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn engine_status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: EngineStatus::Listening,
            detail: None,
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "listening");
        assert_eq!(json["detail"], serde_json::Value::Null);

        let round_trip: EngineStatusEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(round_trip.status, EngineStatus::Listening);
    }
}

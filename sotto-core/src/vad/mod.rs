//! Speech gating: a two-state hysteresis machine over the per-frame loudness
//! metric, with a single-shot debounce deadline confirming end-of-speech.
//!
//! The gate owns no timer thread and never sleeps. The debounce is a deadline
//! polled by the same worker that processes frames, so deadline expiry and
//! frame processing can never interleave and no locking is required.

pub mod warmup;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

/// Shared, atomically updated speech threshold.
///
/// A single `f64` bit-cast through an `AtomicU64`: the UI thread writes, the
/// pipeline worker reads once per frame. Last writer wins — there is no
/// transactional requirement on this value.
#[derive(Clone, Debug)]
pub struct Threshold(Arc<AtomicU64>);

impl Threshold {
    pub fn new(value: f64) -> Self {
        Self(Arc::new(AtomicU64::new(value.to_bits())))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// A transition observed while judging a frame or polling the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    /// Loudness rose above threshold while not speaking.
    ///
    /// `resumed` is true when the rise canceled a pending debounce window:
    /// the dip was bridged and accumulation continues into the same
    /// utterance. When false, this is a genuine new utterance after a
    /// confirmed silence.
    Started { resumed: bool },
    /// The debounce deadline expired with loudness still at or below
    /// threshold — silence is confirmed and the utterance is closed.
    Stopped,
}

/// Two-state hysteresis gate with asymmetric confirmation delay.
///
/// Entering speech is immediate (`loudness > threshold`); leaving it requires
/// loudness to hold at or below threshold for the full debounce window.
#[derive(Debug)]
pub struct SpeechGate {
    threshold: Threshold,
    debounce: Duration,
    speaking: bool,
    /// Pending end-of-speech confirmation. `Some` only while not speaking.
    deadline: Option<Instant>,
}

impl SpeechGate {
    pub fn new(threshold: Threshold, debounce: Duration) -> Self {
        Self {
            threshold,
            debounce,
            speaking: false,
            deadline: None,
        }
    }

    /// Check the debounce deadline.
    ///
    /// Called at the start of every processing step and whenever the worker
    /// finds no pending audio, so confirmation does not depend on another
    /// frame arriving.
    pub fn poll(&mut self, now: Instant) -> Option<GateTransition> {
        match self.deadline {
            Some(deadline) if !self.speaking && now >= deadline => {
                self.deadline = None;
                Some(GateTransition::Stopped)
            }
            _ => None,
        }
    }

    /// Judge one frame's loudness against the current threshold.
    pub fn observe(&mut self, loudness: f64, now: Instant) -> Option<GateTransition> {
        let threshold = self.threshold.get();

        if loudness > threshold && !self.speaking {
            self.speaking = true;
            let resumed = self.deadline.take().is_some();
            Some(GateTransition::Started { resumed })
        } else if loudness <= threshold && self.speaking {
            self.speaking = false;
            // Idempotent arm: re-arming while armed is a no-op, so the
            // deadline is never stacked and never double-fires.
            if self.deadline.is_none() {
                self.deadline = Some(now + self.debounce);
            }
            None
        } else {
            None
        }
    }

    /// True while speech is confirmed active.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// True while an end-of-speech confirmation is pending.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True while the utterance buffer should accumulate: confirmed speech,
    /// or a tentative ending that may still be bridged.
    pub fn accumulating(&self) -> bool {
        self.speaking || self.deadline.is_some()
    }

    /// Back to confirmed silence with no pending deadline.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.deadline = None;
    }
}

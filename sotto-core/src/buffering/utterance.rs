//! Accumulation buffer for the samples of one speech region.

/// Appendable, ordered sample accumulator with single-writer semantics.
///
/// The gate's processing step appends while speech is confirmed or
/// tentatively ending; the buffer is emptied exactly once, when silence is
/// confirmed and the utterance is handed off. All mutation happens on the
/// pipeline worker, so no synchronization is needed.
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    samples: Vec<f32>,
}

impl UtteranceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame's samples to the current region.
    pub fn append(&mut self, samples: &[f32]) {
        self.samples.extend_from_slice(samples);
    }

    /// Return the accumulated samples, leaving the buffer empty.
    ///
    /// The returned `Vec` is moved out — a single ownership transfer to the
    /// consumer; the buffer never aliases it afterwards.
    pub fn flush(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    /// Drop any accumulated samples. No-op on an empty buffer.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

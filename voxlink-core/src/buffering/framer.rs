//! Slices arbitrarily sized capture buffers into fixed-size frames.

/// Accumulates samples and yields frames of exactly `frame_samples`.
#[derive(Debug)]
pub struct Framer {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Append `samples`, calling `emit` once per completed frame.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            emit(std::mem::replace(&mut self.pending, rest));
        }
    }

    /// Samples waiting for the next full frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Emit the remainder zero-padded to a full frame, if any is pending.
    pub fn flush_padded(&mut self) -> Option<Vec<f32>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut frame = std::mem::take(&mut self.pending);
        frame.resize(self.frame_samples, 0.0);
        Some(frame)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

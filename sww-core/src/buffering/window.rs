//! Sliding window over the most recent `window_len` mono samples.

use crate::buffering::chunk::AudioChunk;
use crate::error::{Result, SwwError};

/// Fixed-length window advanced by `stride` samples per call.
///
/// `samples()[0]` is the oldest sample. The window starts all-zero and is
/// re-zeroed by [`SlidingWindow::reset`] on every activation.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: Box<[i16]>,
    stride: usize,
}

impl SlidingWindow {
    pub(crate) fn from_storage(samples: Box<[i16]>, stride: usize) -> Self {
        debug_assert!(stride <= samples.len());
        Self { samples, stride }
    }

    /// Heap-allocate a zeroed window.
    pub fn new(window_len: usize, stride: usize) -> Result<Self> {
        if stride == 0 || stride > window_len {
            return Err(SwwError::InvalidConfig(format!(
                "stride {stride} must be in 1..={window_len}"
            )));
        }
        Ok(Self::from_storage(
            vec![0i16; window_len].into_boxed_slice(),
            stride,
        ))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn reset(&mut self) {
        self.samples.fill(0);
    }

    /// Drop the oldest `stride` samples and append `new_samples` (mono).
    ///
    /// # Errors
    /// `SwwError::FrameLength` unless exactly `stride` samples are supplied.
    pub fn advance(&mut self, new_samples: &[i16]) -> Result<()> {
        if new_samples.len() != self.stride {
            return Err(SwwError::FrameLength {
                expected: self.stride,
                given: new_samples.len(),
            });
        }
        let keep = self.shift_out();
        self.samples[keep..].copy_from_slice(new_samples);
        Ok(())
    }

    /// Same as [`advance`](Self::advance) but sourced from an interleaved
    /// chunk: the tail receives the first `stride` samples of channel 0.
    ///
    /// # Errors
    /// `SwwError::FrameLength` if the chunk holds fewer than `stride` frames.
    pub fn advance_from_chunk(&mut self, chunk: &AudioChunk<'_>) -> Result<()> {
        if chunk.frames() < self.stride {
            return Err(SwwError::FrameLength {
                expected: self.stride,
                given: chunk.frames(),
            });
        }
        let keep = self.shift_out();
        for (n, dst) in self.samples[keep..].iter_mut().enumerate() {
            *dst = chunk.mono_sample(n);
        }
        Ok(())
    }

    /// Shift the retained samples to the front; returns where the tail starts.
    fn shift_out(&mut self) -> usize {
        let keep = self.samples.len() - self.stride;
        self.samples.copy_within(self.stride.., 0);
        keep
    }
}

//! Typed view of one DMA-sized block of raw samples.

/// A completed transfer: `channels`-way interleaved i16 PCM.
///
/// Borrowed from whichever half of the double buffer just finished filling.
/// Only the first channel is used by the feature pipeline.
#[derive(Debug, Clone, Copy)]
pub struct AudioChunk<'a> {
    samples: &'a [i16],
    channels: usize,
}

impl<'a> AudioChunk<'a> {
    /// # Panics
    /// Panics if `channels` is zero.
    pub fn new(samples: &'a [i16], channels: usize) -> Self {
        assert!(channels > 0, "a chunk needs at least one channel");
        Self { samples, channels }
    }

    /// A single-channel chunk (command-driven test path).
    pub fn mono(samples: &'a [i16]) -> Self {
        Self::new(samples, 1)
    }

    /// Raw interleaved samples.
    pub fn raw(&self) -> &'a [i16] {
        self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of time points (interleaved frames) in the chunk.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// The `n`th sample of the first channel, i.e. raw index `n * channels`.
    #[inline]
    pub fn mono_sample(&self, n: usize) -> i16 {
        self.samples[n * self.channels]
    }

    /// First-channel samples in time order.
    pub fn mono_samples(&self) -> impl Iterator<Item = i16> + 'a {
        self.samples.iter().step_by(self.channels).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

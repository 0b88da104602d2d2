//! Fixed-capacity sample buffers.
//!
//! - [`DoubleBuffer`]: the two alternating transfer buffers. The source fills
//!   the *active* half while the pipeline drains the *idle* half.
//! - [`window::SlidingWindow`]: the last `window_len` mono samples.
//! - An SPSC ring (`ringbuf::HeapRb<i16>`) used by the replay source to hand
//!   samples from its pacing thread to the transfer-completion path.
//!
//! Everything here is allocated once at engine construction; nothing in the
//! per-chunk path allocates.

pub mod chunk;
pub mod window;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

use crate::error::{Result, SwwError};

/// Producer half, held by the replay pacing thread.
pub type SampleProducer = ringbuf::HeapProd<i16>;

/// Consumer half, held by the audio source on the engine side.
pub type SampleConsumer = ringbuf::HeapCons<i16>;

/// Value written to both transfer buffers on activation (`0xFFFF`), so a
/// transfer that never landed is recognisable in a dump.
pub const SENTINEL_SAMPLE: i16 = -1;

/// Create a matched producer/consumer pair backed by a heap-allocated ring.
pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<i16>::new(capacity).split()
}

/// Allocate a zeroed boxed slice, reporting failure instead of aborting.
pub(crate) fn try_alloc<T: Copy + Default>(len: usize, what: &'static str) -> Result<Box<[T]>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| SwwError::Allocation {
            what,
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    v.resize(len, T::default());
    Ok(v.into_boxed_slice())
}

/// Ping-pong pair of raw transfer buffers plus the active/idle selector.
#[derive(Debug)]
pub struct DoubleBuffer {
    halves: [Box<[i16]>; 2],
    active: usize,
}

impl DoubleBuffer {
    /// Allocate two buffers of `chunk_len` raw samples each.
    pub fn new(chunk_len: usize) -> Result<Self> {
        Ok(Self {
            halves: [
                try_alloc(chunk_len, "transfer buffer 0")?,
                try_alloc(chunk_len, "transfer buffer 1")?,
            ],
            active: 0,
        })
    }

    /// Raw samples per half.
    pub fn chunk_len(&self) -> usize {
        self.halves[0].len()
    }

    /// Index (0 or 1) of the half currently being filled.
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// The half the source is writing into.
    pub fn active_mut(&mut self) -> &mut [i16] {
        &mut self.halves[self.active]
    }

    /// The half that completed most recently and is ready to drain.
    pub fn idle(&self) -> &[i16] {
        &self.halves[self.active ^ 1]
    }

    /// Flip the selector after a completed transfer. The half that was just
    /// filled becomes idle; the other one becomes the next transfer target.
    /// Returns the index of the now-idle half.
    pub fn swap(&mut self) -> usize {
        let filled = self.active;
        self.active ^= 1;
        filled
    }

    /// Sentinel-fill both halves and point the selector back at half 0.
    pub fn rearm(&mut self) {
        for half in &mut self.halves {
            half.fill(SENTINEL_SAMPLE);
        }
        self.active = 0;
    }

    pub fn half(&self, index: usize) -> &[i16] {
        &self.halves[index & 1]
    }
}

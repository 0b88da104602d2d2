//! Audio transport abstraction.
//!
//! # Transfer model
//!
//! The engine drives the source one transfer at a time, the way a DMA
//! receive works on the target hardware:
//!
//! ```text
//! engine ── request_receive(len) ──► source     (arm one transfer)
//! source ── TransferEvent::Complete ─► channel  (from the source's own thread)
//! engine ◄─ recv() ── on_transfer_event(..) ── complete_transfer(dst)
//! ```
//!
//! Completion is signalled over a `crossbeam-channel` rather than a callback,
//! so the engine consumes it on its own turn with no shared mutable state.
//! The side that raises an event must not allocate or block: `Sender::send`
//! on an unbounded channel and the ring-buffer `push_slice` both qualify.

pub mod replay;
pub mod resample;
pub mod wav;

pub use replay::{ReplayConfig, ReplaySource};

use crate::ipc::events::TransferStatus;

/// Completion notification for the single in-flight transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// The requested number of samples is ready for `complete_transfer`.
    Complete,
    /// The transfer was cancelled by `abort` before it completed.
    Aborted,
    /// The transport failed; no data is available.
    Error(TransferStatus),
}

/// Contract for raw PCM transports (I2S/DMA on hardware, replay on a host).
///
/// At most one transfer is in flight. Every accepted `request_receive` is
/// answered by exactly one [`TransferEvent`].
pub trait AudioSource: Send {
    /// Arm a receive of `len` interleaved samples.
    ///
    /// Returns the transport status; anything but `Ok` means no event will
    /// follow.
    fn request_receive(&mut self, len: usize) -> TransferStatus;

    /// Move the completed transfer into `dst`. Returns samples written.
    fn complete_transfer(&mut self, dst: &mut [i16]) -> usize;

    /// Best-effort cancellation of the in-flight transfer.
    fn abort(&mut self) -> TransferStatus;

    /// Interleaved channels delivered per frame.
    fn channels(&self) -> usize {
        2
    }
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn request_receive(&mut self, len: usize) -> TransferStatus {
        (**self).request_receive(len)
    }

    fn complete_transfer(&mut self, dst: &mut [i16]) -> usize {
        (**self).complete_transfer(dst)
    }

    fn abort(&mut self) -> TransferStatus {
        (**self).abort()
    }

    fn channels(&self) -> usize {
        (**self).channels()
    }
}

//! Acquisition state shared with foreground observers.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use tracing::warn;

use crate::ipc::events::AcquisitionState;

/// Lock-free cell holding the current [`AcquisitionState`].
///
/// The engine is the only writer. Clones handed out through
/// [`WakewordEngine::state_probe`](super::WakewordEngine::state_probe) let
/// other threads read the state without touching the pipeline context.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(AcquisitionState::Idle as u8)))
    }

    /// Current state. A raw value outside the enum is normalized to
    /// `Stopping`, so the next completion event drains to `Idle`.
    pub fn load(&self) -> AcquisitionState {
        let raw = self.0.load(Ordering::Acquire);
        match AcquisitionState::from_raw(raw) {
            Some(state) => state,
            None => {
                warn!(raw, "unknown acquisition state, requesting stop");
                self.0
                    .store(AcquisitionState::Stopping as u8, Ordering::Release);
                AcquisitionState::Stopping
            }
        }
    }

    pub(crate) fn store(&self, state: AcquisitionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn store_raw(&self, raw: u8) {
        self.0.store(raw, Ordering::Release);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

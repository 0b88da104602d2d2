//! # sww-core
//!
//! Streaming wakeword detection front end.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ─► TransferEvent ─► WakewordEngine::on_transfer_event
//!  (stereo i16,     (channel)              │
//!   one stride)                   DoubleBuffer (active / idle half)
//!                                          │
//!                             SlidingWindow (left channel, shift by stride)
//!                                          │
//!                       FeatureExtractor (pre-emphasis, Hamming, FFT, log-mel)
//!                                          │
//!                        ModelInput (int8, oldest frame dropped, newest appended)
//!                                          │
//!                                WakewordModel::run
//!                                          │
//!                         broadcast::Sender<DetectionEvent>
//! ```
//!
//! Every buffer is allocated in `WakewordEngine::new`; the per-chunk path
//! only copies, transforms and quantizes into them.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod features;
pub mod inference;
pub mod ipc;

// Convenience re-exports for downstream crates
pub use audio::{AudioSource, ReplayConfig, ReplaySource, TransferEvent};
pub use engine::{EngineConfig, StateProbe, WakewordEngine};
pub use error::SwwError;
pub use features::{FeatureConfig, FeatureExtractor};
pub use inference::{ModelHandle, QuantParams, StubModel, WakewordModel};
pub use ipc::events::{
    AcquisitionState, CaptureCompleteEvent, DetectionEvent, EngineStatusEvent, TransferStatus,
};

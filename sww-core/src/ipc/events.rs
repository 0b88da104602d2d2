//! Event types published by the engine on its broadcast channels.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `EngineStatusEvent` | `WakewordEngine::subscribe_status` |
//! | `DetectionEvent` | `WakewordEngine::subscribe_detections` |
//! | `CaptureCompleteEvent` | `WakewordEngine::subscribe_captures` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Acquisition state
// ---------------------------------------------------------------------------

/// Operating mode of the acquisition state machine.
///
/// Stored as a `u8` inside the engine so the foreground path can read it
/// without touching the pipeline context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AcquisitionState {
    /// Nothing in flight. Initial state.
    Idle = 0,
    /// Continuous detection: every completed chunk runs the full pipeline.
    Streaming = 1,
    /// Linear recording into the general-purpose buffer.
    FileCapture = 2,
    /// Cancellation requested; waiting for the in-flight transfer to finish.
    Stopping = 3,
}

impl AcquisitionState {
    /// Decode a raw state value. Returns `None` for values outside the enum.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Idle),
            1 => Some(Self::Streaming),
            2 => Some(Self::FileCapture),
            3 => Some(Self::Stopping),
            _ => None,
        }
    }

    /// `true` for every state that blocks a new `start`/`capture`.
    pub fn is_busy(self) -> bool {
        self != Self::Idle
    }
}

/// Status code space of the audio transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Ok,
    Error,
    Busy,
    Timeout,
}

impl TransferStatus {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Numeric code as printed by the host protocol (0=Ok, 1=Error, 2=Busy, 3=Timeout).
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Error => 1,
            Self::Busy => 2,
            Self::Timeout => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted whenever the acquisition state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub state: AcquisitionState,
    /// Status returned by the most recent transport request.
    pub last_status: TransferStatus,
    /// Optional human-readable detail.
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Detection events
// ---------------------------------------------------------------------------

/// Emitted once per rising edge of "score exceeds threshold".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Index of the processing cycle (chunks since `start`) that triggered.
    pub cycle: u32,
    /// Raw int8 class-0 score from the model output.
    pub score: i8,
}

// ---------------------------------------------------------------------------
// Capture events
// ---------------------------------------------------------------------------

/// Emitted when a file capture fills its target length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureCompleteEvent {
    /// Raw (interleaved) samples received from the source.
    pub samples_read: usize,
    /// Target length after clamping.
    pub samples_requested: usize,
}

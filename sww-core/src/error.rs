use thiserror::Error;

use crate::ipc::events::{AcquisitionState, TransferStatus};

/// All errors produced by sww-core.
#[derive(Debug, Error)]
pub enum SwwError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("buffer allocation failed: {what} ({bytes} bytes)")]
    Allocation { what: &'static str, bytes: usize },

    #[error("{0} buffer was not allocated at startup")]
    BufferUnavailable(&'static str),

    #[error("acquisition already in progress ({0:?})")]
    Busy(AcquisitionState),

    #[error("acquisition is already idle")]
    NotRunning,

    #[error("stop already requested")]
    StopPending,

    #[error("frame length ({given}) must equal configured length ({expected})")]
    FrameLength { expected: usize, given: usize },

    #[error("audio transfer failed with status {0:?}")]
    Transport(TransferStatus),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("audio file error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SwwError>;

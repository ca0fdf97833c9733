//! Error types for the encoder module.

use thiserror::Error;

use crate::EncoderState;

/// Errors that can occur while driving an encoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// No encoder exists for the requested codec.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// The encoder rejected the requested format.
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// The underlying codec failed to initialize.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// General encoding error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Operation is not valid in the current lifecycle state.
    #[error("Cannot {operation} encoder in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: EncoderState,
    },

    /// Encoder is not started.
    #[error("Encoder not started")]
    NotStarted,

    /// Encoder has been released.
    #[error("Encoder released")]
    Released,

    /// Output buffer index is not currently dequeued.
    #[error("Output buffer {0} is not dequeued")]
    InvalidBuffer(usize),

    /// Input surface has been released.
    #[error("Input surface released")]
    SurfaceReleased,

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),
}

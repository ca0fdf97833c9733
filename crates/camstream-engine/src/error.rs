//! Error types for the pipeline.

use camstream_capture::CaptureError;
use camstream_encoder::EncoderError;
use camstream_transport::TransportError;
use thiserror::Error;

/// Errors that stop a pipeline from coming up.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Camera enumeration returned nothing.
    #[error("No camera available")]
    NoCamera,

    /// Camera access or session failure.
    #[error("Camera error: {0}")]
    Capture(#[from] CaptureError),

    /// Encoder rejected the configuration or failed to start.
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// Network endpoint could not be opened.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Worker thread could not be spawned.
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

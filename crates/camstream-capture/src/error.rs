//! Error types for the capture module.

use camstream_encoder::EncoderError;
use thiserror::Error;

/// Errors that can occur during camera and capture session operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Camera access was denied by the platform.
    #[error("Camera access denied: {0}")]
    AccessDenied(String),

    /// Requested camera does not exist.
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    /// A device is already open or opening.
    #[error("Camera already open")]
    AlreadyOpen,

    /// Camera device disconnected.
    #[error("Camera device disconnected")]
    Disconnected,

    /// Camera device reported an error.
    #[error("Camera device error {0}")]
    DeviceError(i32),

    /// Capture session could not be configured.
    #[error("Capture session configuration failed")]
    SessionConfigureFailed,

    /// Capture session or device is closed.
    #[error("Capture session closed")]
    SessionClosed,

    /// Capture request was rejected.
    #[error("Capture request rejected: {0}")]
    RequestRejected(String),

    /// Camera subsystem failure.
    #[error("Camera access error: {0}")]
    CameraAccess(String),

    /// Target surface failure.
    #[error("Surface error: {0}")]
    Surface(#[from] EncoderError),
}

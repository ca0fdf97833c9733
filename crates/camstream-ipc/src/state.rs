//! Pipeline state machine types.

use serde::{Deserialize, Serialize};

use crate::types::{Destination, StreamConfig};

/// The current state of the capture → encode → transmit pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Nothing is held, not streaming.
    #[default]
    Idle,

    /// Pipeline is coming up.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// Camera frames are flowing into the encoder and out to the network.
    Live {
        /// Where datagrams are sent.
        destination: Destination,

        /// Active stream configuration.
        config: StreamConfig,
    },

    /// Resources are held but no frames flow; only `stop` recovers.
    Stalled {
        /// Why the pipeline stalled.
        reason: String,
    },

    /// Pipeline is tearing down.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,

        /// Current shutdown phase.
        phase: ShutdownPhase,
    },

    /// Pipeline failed and has released everything it held.
    Error {
        /// Error message.
        message: String,

        /// Whether a new start may succeed.
        recoverable: bool,
    },
}

impl PipelineState {
    /// Returns true if the pipeline is in the Idle state.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the pipeline is live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    /// Returns true if the pipeline is starting.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting { .. })
    }

    /// Returns true if the pipeline is stalled.
    pub fn is_stalled(&self) -> bool {
        matches!(self, Self::Stalled { .. })
    }

    /// Returns true if the pipeline is stopping.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Returns true if the pipeline is in an error state.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns true while the pipeline holds session resources.
    pub fn is_running(&self) -> bool {
        self.is_starting() || self.is_live() || self.is_stalled()
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Live { .. } => "Live",
            Self::Stalled { .. } => "Stalled",
            Self::Stopping { .. } => "Stopping",
            Self::Error { .. } => "Error",
        }
    }
}

/// Startup phases for the pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Enumerating cameras and selecting the first one.
    ResolveCamera,

    /// Opening the outbound datagram socket.
    OpenEndpoint,

    /// Configuring and starting the hardware encoder.
    ConfigureEncoder,

    /// Spawning the encoder drain loop.
    StartDrain,

    /// Waiting for the camera device to open.
    OpenCamera,

    /// Waiting for the capture session to be configured.
    ConfigureSession,

    /// Submitting the repeating capture request.
    StartRepeating,
}

impl StartupPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::ResolveCamera => Some(Self::OpenEndpoint),
            Self::OpenEndpoint => Some(Self::ConfigureEncoder),
            Self::ConfigureEncoder => Some(Self::StartDrain),
            Self::StartDrain => Some(Self::OpenCamera),
            Self::OpenCamera => Some(Self::ConfigureSession),
            Self::ConfigureSession => Some(Self::StartRepeating),
            Self::StartRepeating => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::ResolveCamera => "Selecting camera",
            Self::OpenEndpoint => "Opening network endpoint",
            Self::ConfigureEncoder => "Configuring encoder",
            Self::StartDrain => "Starting encoder drain",
            Self::OpenCamera => "Opening camera",
            Self::ConfigureSession => "Configuring capture session",
            Self::StartRepeating => "Starting capture",
        }
    }
}

/// Shutdown phases for the pipeline, in mandatory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    /// Stopping the repeating capture request.
    StopRepeating,

    /// Aborting in-flight capture requests.
    AbortCaptures,

    /// Closing the capture session.
    CloseSession,

    /// Closing the camera device.
    CloseDevice,

    /// Cancelling and joining the drain loop.
    StopDrain,

    /// Stopping and releasing the encoder.
    ReleaseEncoder,

    /// Closing the network endpoint.
    CloseEndpoint,
}

impl ShutdownPhase {
    /// The first teardown step.
    pub const FIRST: Self = Self::StopRepeating;

    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::StopRepeating => Some(Self::AbortCaptures),
            Self::AbortCaptures => Some(Self::CloseSession),
            Self::CloseSession => Some(Self::CloseDevice),
            Self::CloseDevice => Some(Self::StopDrain),
            Self::StopDrain => Some(Self::ReleaseEncoder),
            Self::ReleaseEncoder => Some(Self::CloseEndpoint),
            Self::CloseEndpoint => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::StopRepeating => "Stopping repeating request",
            Self::AbortCaptures => "Aborting captures",
            Self::CloseSession => "Closing capture session",
            Self::CloseDevice => "Closing camera",
            Self::StopDrain => "Stopping encoder drain",
            Self::ReleaseEncoder => "Releasing encoder",
            Self::CloseEndpoint => "Closing network endpoint",
        }
    }
}

/// Reason for stopping the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Operator requested stop.
    UserRequested,

    /// Camera device disconnected or reported an error.
    CameraError { message: String },

    /// Capture session could not be configured.
    SessionError { message: String },

    /// Engine is shutting down.
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Stream stopped by user".to_string(),
            Self::CameraError { message } => format!("Camera error: {message}"),
            Self::SessionError { message } => format!("Capture session error: {message}"),
            Self::Shutdown => "Engine shutting down".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_states() {
        assert!(!PipelineState::Idle.is_running());
        assert!(PipelineState::Starting {
            phase: StartupPhase::OpenCamera
        }
        .is_running());
        assert!(PipelineState::Stalled {
            reason: "camera lost".into()
        }
        .is_running());
        assert!(!PipelineState::Error {
            message: "boom".into(),
            recoverable: true
        }
        .is_running());
    }

    #[test]
    fn test_shutdown_order() {
        let mut order = vec![ShutdownPhase::FIRST];
        while let Some(next) = order.last().and_then(|p| p.next()) {
            order.push(next);
        }

        assert_eq!(
            order,
            vec![
                ShutdownPhase::StopRepeating,
                ShutdownPhase::AbortCaptures,
                ShutdownPhase::CloseSession,
                ShutdownPhase::CloseDevice,
                ShutdownPhase::StopDrain,
                ShutdownPhase::ReleaseEncoder,
                ShutdownPhase::CloseEndpoint,
            ]
        );
    }

    #[test]
    fn test_startup_ends_with_repeating_request() {
        let mut phase = StartupPhase::ResolveCamera;
        let mut steps = 1;
        while let Some(next) = phase.next() {
            phase = next;
            steps += 1;
        }
        assert_eq!(phase, StartupPhase::StartRepeating);
        assert_eq!(steps, 7);
    }

    #[test]
    fn test_stop_reason_messages() {
        let reasons = [
            StopReason::UserRequested,
            StopReason::CameraError {
                message: "disconnected".into(),
            },
            StopReason::SessionError {
                message: "configure failed".into(),
            },
            StopReason::Shutdown,
        ];
        let messages: Vec<String> = reasons.iter().map(StopReason::message).collect();

        assert_eq!(
            messages,
            vec![
                "Stream stopped by user",
                "Camera error: disconnected",
                "Capture session error: configure failed",
                "Engine shutting down",
            ]
        );
    }
}

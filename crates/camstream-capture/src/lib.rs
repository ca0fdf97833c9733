//! Camera device and capture session control.
//!
//! The camera subsystem is asynchronous: opening a device and configuring a
//! capture session complete later, on a thread owned by the camera backend.
//! Backends report completion as [`CameraEvent`] messages tagged with the
//! generation of the open attempt they belong to. The
//! [`CaptureSessionController`] consumes those messages and is the only place
//! that moves a session through its states.
//!
//! No frame data crosses this crate: frames are rendered straight into the
//! encoder's [`InputSurface`].

mod controller;
mod error;
mod virtual_camera;

pub use controller::{CaptureSessionController, ControllerOutcome, SessionState};
pub use error::CaptureError;
pub use virtual_camera::{VirtualCameraConfig, VirtualCameraProvider};

use camstream_encoder::InputSurface;
use crossbeam_channel::{SendError, Sender};
use tracing::debug;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Capture request templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    /// Low-latency viewfinder.
    Preview,

    /// Stable frame rate suited to video recording.
    Record,
}

/// A capture request targeting one or more surfaces.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Template the request was built from.
    pub template: RequestTemplate,

    /// Surfaces each capture renders into.
    pub targets: Vec<InputSurface>,
}

impl CaptureRequest {
    /// Create a request with no targets.
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
        }
    }

    /// Add a render target.
    pub fn add_target(mut self, surface: InputSurface) -> Self {
        self.targets.push(surface);
        self
    }
}

/// Asynchronous completion from the camera subsystem.
pub enum CameraEvent {
    /// The device finished opening.
    DeviceOpened(Box<dyn CameraDevice>),

    /// The device went away.
    DeviceDisconnected,

    /// The device reported an error code.
    DeviceError(i32),

    /// The capture session is ready for requests.
    SessionConfigured(Box<dyn CameraCaptureSession>),

    /// The capture session could not be configured.
    SessionConfigureFailed,
}

impl CameraEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceOpened(_) => "DeviceOpened",
            Self::DeviceDisconnected => "DeviceDisconnected",
            Self::DeviceError(_) => "DeviceError",
            Self::SessionConfigured(_) => "SessionConfigured",
            Self::SessionConfigureFailed => "SessionConfigureFailed",
        }
    }

    /// Close any handle the event carries.
    pub fn discard(self) {
        match self {
            Self::DeviceOpened(mut device) => {
                debug!(camera_id = device.id(), "Closing unclaimed camera device");
                device.close();
            }
            Self::SessionConfigured(mut session) => {
                debug!("Closing unclaimed capture session");
                session.close();
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for CameraEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceError(code) => write!(f, "DeviceError({code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// A camera event tagged with the open attempt it belongs to.
#[derive(Debug)]
pub struct CallbackEnvelope {
    /// Generation of the open attempt.
    pub generation: u64,

    /// The event.
    pub event: CameraEvent,
}

/// Handle a camera backend uses to report completions for one open attempt.
#[derive(Clone)]
pub struct CameraCallbacks {
    generation: u64,
    sender: Sender<CallbackEnvelope>,
}

impl CameraCallbacks {
    /// Create callbacks for `generation`.
    pub fn new(generation: u64, sender: Sender<CallbackEnvelope>) -> Self {
        Self { generation, sender }
    }

    /// Generation of the open attempt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event. If nobody is listening, carried handles are closed.
    pub fn deliver(&self, event: CameraEvent) -> bool {
        let envelope = CallbackEnvelope {
            generation: self.generation,
            event,
        };
        match self.sender.send(envelope) {
            Ok(()) => true,
            Err(SendError(envelope)) => {
                debug!(
                    generation = self.generation,
                    event = envelope.event.name(),
                    "Callback receiver gone"
                );
                envelope.event.discard();
                false
            }
        }
    }
}

/// Enumerates and opens cameras.
pub trait CameraProvider: Send + Sync {
    /// Identifiers of the available cameras, in platform order.
    fn camera_ids(&self) -> CaptureResult<Vec<String>>;

    /// Begin opening a camera. Completion arrives through `callbacks`.
    fn open_camera(&self, camera_id: &str, callbacks: CameraCallbacks) -> CaptureResult<()>;
}

/// An open camera device.
pub trait CameraDevice: Send {
    /// Camera identifier.
    fn id(&self) -> &str;

    /// Build a request from a template.
    fn create_capture_request(&self, template: RequestTemplate) -> CaptureResult<CaptureRequest> {
        Ok(CaptureRequest::new(template))
    }

    /// Begin configuring a session rendering into `outputs`. Completion
    /// arrives through `callbacks`.
    fn create_capture_session(
        &mut self,
        outputs: Vec<InputSurface>,
        callbacks: CameraCallbacks,
    ) -> CaptureResult<()>;

    /// Close the device. Idempotent.
    fn close(&mut self);
}

/// A configured capture session.
pub trait CameraCaptureSession: Send {
    /// Submit a request that repeats until stopped.
    fn set_repeating_request(&mut self, request: CaptureRequest) -> CaptureResult<()>;

    /// Stop the repeating request.
    fn stop_repeating(&mut self) -> CaptureResult<()>;

    /// Discard in-flight captures.
    fn abort_captures(&mut self) -> CaptureResult<()>;

    /// Close the session. Idempotent.
    fn close(&mut self);
}

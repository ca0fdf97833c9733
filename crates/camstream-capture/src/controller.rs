//! Capture session state machine.

use camstream_encoder::InputSurface;
use crossbeam_channel::Sender;
use tracing::{debug, error, info, instrument, warn};

use crate::error::CaptureError;
use crate::{
    CallbackEnvelope, CameraCallbacks, CameraCaptureSession, CameraDevice, CameraEvent,
    CameraProvider, CaptureRequest, CaptureResult, RequestTemplate,
};

/// Lifecycle of the binding between a camera device and the input surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Opening,
    Configuring,
    Active,
    Closing,
    Closed,
}

/// What a handled callback means for the owner of the controller.
#[derive(Debug)]
pub enum ControllerOutcome {
    /// Stale or unexpected callback; any carried handle was closed.
    Ignored,

    /// Device opened, session configuration requested.
    Configuring,

    /// Repeating request submitted; frames are flowing.
    Active,

    /// Session is open but the repeating request was refused.
    Idle(CaptureError),

    /// Session is dead; the device handle has been released.
    Failed(CaptureError),
}

/// Owns the camera device and capture session for one streaming session.
///
/// Callbacks from the camera backend are fed in through [`handle`]. Each
/// open attempt gets a fresh generation; callbacks carrying any other
/// generation are stale and their handles are closed on arrival.
///
/// [`handle`]: CaptureSessionController::handle
pub struct CaptureSessionController {
    state: SessionState,
    generation: u64,
    callbacks: Sender<CallbackEnvelope>,
    surface: Option<InputSurface>,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CameraCaptureSession>>,
}

impl CaptureSessionController {
    /// Create a controller whose backends report into `callbacks`.
    pub fn new(callbacks: Sender<CallbackEnvelope>) -> Self {
        Self {
            state: SessionState::Unopened,
            generation: 0,
            callbacks,
            surface: None,
            device: None,
            session: None,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Generation of the current open attempt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a device handle is held.
    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Whether a session handle is held.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Begin opening `camera_id`; frames will render into `surface`.
    #[instrument(name = "capture_open", skip(self, provider, surface))]
    pub fn open(
        &mut self,
        provider: &dyn CameraProvider,
        camera_id: &str,
        surface: InputSurface,
    ) -> CaptureResult<()> {
        if !matches!(self.state, SessionState::Unopened | SessionState::Closed) {
            return Err(CaptureError::AlreadyOpen);
        }

        self.generation += 1;
        self.state = SessionState::Opening;
        self.surface = Some(surface);

        let callbacks = CameraCallbacks::new(self.generation, self.callbacks.clone());
        if let Err(e) = provider.open_camera(camera_id, callbacks) {
            self.state = SessionState::Closed;
            self.surface = None;
            return Err(e);
        }

        info!(generation = self.generation, "Opening camera");
        Ok(())
    }

    /// Apply one camera callback.
    pub fn handle(&mut self, envelope: CallbackEnvelope) -> ControllerOutcome {
        let CallbackEnvelope { generation, event } = envelope;

        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                event = event.name(),
                "Dropping stale camera callback"
            );
            event.discard();
            return ControllerOutcome::Ignored;
        }

        match (self.state, event) {
            (SessionState::Opening, CameraEvent::DeviceOpened(device)) => {
                self.on_device_opened(device)
            }
            (
                SessionState::Opening | SessionState::Configuring | SessionState::Active,
                CameraEvent::DeviceDisconnected,
            ) => {
                warn!("Camera disconnected");
                self.release_handles();
                ControllerOutcome::Failed(CaptureError::Disconnected)
            }
            (
                SessionState::Opening | SessionState::Configuring | SessionState::Active,
                CameraEvent::DeviceError(code),
            ) => {
                error!(code, "Camera device error");
                self.release_handles();
                ControllerOutcome::Failed(CaptureError::DeviceError(code))
            }
            (SessionState::Configuring, CameraEvent::SessionConfigured(session)) => {
                self.on_session_configured(session)
            }
            (SessionState::Configuring, CameraEvent::SessionConfigureFailed) => {
                error!("Camera capture session configuration failed");
                self.release_handles();
                ControllerOutcome::Failed(CaptureError::SessionConfigureFailed)
            }
            (state, event) => {
                debug!(?state, event = event.name(), "Ignoring unexpected camera callback");
                event.discard();
                ControllerOutcome::Ignored
            }
        }
    }

    fn on_device_opened(&mut self, mut device: Box<dyn CameraDevice>) -> ControllerOutcome {
        let Some(surface) = self.surface.clone() else {
            device.close();
            self.state = SessionState::Closed;
            return ControllerOutcome::Failed(CaptureError::SessionClosed);
        };

        info!(camera_id = device.id(), "Camera opened");
        let callbacks = CameraCallbacks::new(self.generation, self.callbacks.clone());
        match device.create_capture_session(vec![surface], callbacks) {
            Ok(()) => {
                self.device = Some(device);
                self.state = SessionState::Configuring;
                ControllerOutcome::Configuring
            }
            Err(e) => {
                error!("Failed to create capture session: {}", e);
                device.close();
                self.state = SessionState::Closed;
                self.surface = None;
                ControllerOutcome::Failed(e)
            }
        }
    }

    fn on_session_configured(
        &mut self,
        session: Box<dyn CameraCaptureSession>,
    ) -> ControllerOutcome {
        let session = self.session.insert(session);
        self.state = SessionState::Active;

        let request = match (&self.device, &self.surface) {
            (Some(device), Some(surface)) => device
                .create_capture_request(RequestTemplate::Record)
                .map(|request| request.add_target(surface.clone())),
            _ => Err(CaptureError::SessionClosed),
        };

        match request.and_then(|request: CaptureRequest| session.set_repeating_request(request)) {
            Ok(()) => {
                info!("Repeating capture request submitted");
                ControllerOutcome::Active
            }
            Err(e) => {
                // Not retried: the session stays open and idle until torn down.
                warn!("Failed to submit repeating request: {}", e);
                ControllerOutcome::Idle(e)
            }
        }
    }

    fn release_handles(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        self.surface = None;
        self.state = SessionState::Closed;
    }

    fn begin_closing(&mut self) {
        if !matches!(self.state, SessionState::Unopened | SessionState::Closed) {
            self.state = SessionState::Closing;
        }
    }

    /// Teardown step 1: stop the repeating request.
    pub fn stop_repeating(&mut self) -> CaptureResult<()> {
        self.begin_closing();
        match self.session.as_mut() {
            Some(session) => session.stop_repeating(),
            None => Ok(()),
        }
    }

    /// Teardown step 2: abort in-flight captures.
    pub fn abort_captures(&mut self) -> CaptureResult<()> {
        self.begin_closing();
        match self.session.as_mut() {
            Some(session) => session.abort_captures(),
            None => Ok(()),
        }
    }

    /// Teardown step 3: close the capture session.
    pub fn close_session(&mut self) {
        self.begin_closing();
        if let Some(mut session) = self.session.take() {
            session.close();
            debug!("Capture session closed");
        }
    }

    /// Teardown step 4: close the camera device.
    ///
    /// A device still opening is not held yet; its late callback is dropped
    /// by [`handle`](Self::handle) once it arrives.
    pub fn close_device(&mut self) {
        self.begin_closing();
        if let Some(mut device) = self.device.take() {
            device.close();
            debug!("Camera device closed");
        }
        self.surface = None;
        if self.state == SessionState::Closing {
            self.state = SessionState::Closed;
        }
    }

    /// Run every teardown step in order, logging failures and continuing.
    pub fn close(&mut self) {
        if let Err(e) = self.stop_repeating() {
            warn!("Failed to stop repeating request: {}", e);
        }
        if let Err(e) = self.abort_captures() {
            warn!("Failed to abort captures: {}", e);
        }
        self.close_session();
        self.close_device();
    }
}

impl Drop for CaptureSessionController {
    fn drop(&mut self) {
        self.close();
    }
}

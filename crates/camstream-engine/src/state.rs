//! Session resources and ordered teardown.

use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, info, instrument, warn};

use camstream_capture::{CallbackEnvelope, CaptureSessionController};
use camstream_encoder::{EncoderState, HardwareEncoder, InputSurface};
use camstream_ipc::ShutdownPhase;
use camstream_transport::DatagramSink;

use crate::drain::DrainHandle;

/// Resources acquired for one streaming session.
///
/// Every field is optional so a partially started session can be torn down
/// with the same code path as a live one.
pub struct SessionResources {
    pub(crate) controller: CaptureSessionController,
    pub(crate) sink: Option<Arc<dyn DatagramSink>>,
    pub(crate) encoder: Option<Arc<dyn HardwareEncoder>>,
    pub(crate) surface: Option<InputSurface>,
    pub(crate) drain: Option<DrainHandle>,
}

impl SessionResources {
    /// Create empty resources whose camera callbacks go to `callbacks`.
    pub fn new(callbacks: Sender<CallbackEnvelope>) -> Self {
        Self {
            controller: CaptureSessionController::new(callbacks),
            sink: None,
            encoder: None,
            surface: None,
            drain: None,
        }
    }

    /// Check if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.sink.is_none()
            && self.encoder.is_none()
            && self.surface.is_none()
            && self.drain.is_none()
            && !self.controller.has_device()
            && !self.controller.has_session()
    }

    /// Release everything in dependency order.
    ///
    /// The camera stops producing before the drain loop is joined, the drain
    /// loop is joined before the encoder is stopped, and the endpoint closes
    /// last. A failing step is logged and the remaining steps still run.
    /// `on_phase` is called as each phase begins.
    #[instrument(name = "teardown", skip_all)]
    pub fn teardown(&mut self, mut on_phase: impl FnMut(ShutdownPhase)) {
        let mut phase = Some(ShutdownPhase::FIRST);

        while let Some(current) = phase {
            on_phase(current);
            self.release_phase(current);
            phase = current.next();
        }

        info!("Session resources released");
    }

    fn release_phase(&mut self, phase: ShutdownPhase) {
        debug!(phase = phase.name(), "Shutdown phase");

        match phase {
            ShutdownPhase::StopRepeating => {
                if let Err(e) = self.controller.stop_repeating() {
                    warn!("Failed to stop repeating request: {}", e);
                }
            }
            ShutdownPhase::AbortCaptures => {
                if let Err(e) = self.controller.abort_captures() {
                    warn!("Failed to abort captures: {}", e);
                }
            }
            ShutdownPhase::CloseSession => self.controller.close_session(),
            ShutdownPhase::CloseDevice => self.controller.close_device(),
            ShutdownPhase::StopDrain => {
                if let Some(drain) = self.drain.take() {
                    drain.stop();
                }
            }
            ShutdownPhase::ReleaseEncoder => {
                if let Some(encoder) = self.encoder.take() {
                    if encoder.state() == EncoderState::Started {
                        if let Err(e) = encoder.stop() {
                            warn!("Failed to stop encoder: {}", e);
                        }
                    }
                    encoder.release();
                }
                if let Some(surface) = self.surface.take() {
                    surface.release();
                }
            }
            ShutdownPhase::CloseEndpoint => {
                if let Some(sink) = self.sink.take() {
                    sink.close();
                }
            }
        }
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.teardown(|_| {});
        }
    }
}

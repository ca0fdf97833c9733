//! Pipeline orchestrator for camstream.
//!
//! This crate binds the camera, encoder, and transport crates into one
//! streaming pipeline with an ordered start/stop lifecycle, and wraps it in
//! a command-driven engine loop for an operator front end.

mod drain;
mod error;
mod metrics;
mod orchestrator;
mod pipeline;
mod state;

pub use error::PipelineError;
pub use metrics::MetricsCollector;
pub use orchestrator::Engine;
pub use pipeline::Pipeline;
pub use state::SessionResources;

use std::sync::Arc;

use camstream_capture::{CameraProvider, VirtualCameraConfig, VirtualCameraProvider};
use camstream_encoder::{DefaultEncoderFactory, EncoderFactory};
use camstream_ipc::{EngineCommand, EngineEvent, PipelinePolicy};
use camstream_transport::{SinkFactory, UdpSinkFactory};
use crossbeam_channel::{Receiver, Sender};

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// The device layer a pipeline runs on.
#[derive(Clone)]
pub struct Hardware {
    /// Camera enumeration and open.
    pub cameras: Arc<dyn CameraProvider>,

    /// Encoder construction.
    pub encoders: Arc<dyn EncoderFactory>,

    /// Network endpoints.
    pub sinks: Arc<dyn SinkFactory>,
}

impl Hardware {
    pub fn new(
        cameras: Arc<dyn CameraProvider>,
        encoders: Arc<dyn EncoderFactory>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            cameras,
            encoders,
            sinks,
        }
    }

    /// Virtual camera, default encoder, and real UDP sockets.
    pub fn virtual_devices(camera: VirtualCameraConfig) -> Self {
        Self::new(
            Arc::new(VirtualCameraProvider::new(camera)),
            Arc::new(DefaultEncoderFactory),
            Arc::new(UdpSinkFactory),
        )
    }
}

/// Create an engine instance with IPC channels.
pub fn create_engine(
    hardware: Hardware,
    policy: PipelinePolicy,
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
) -> PipelineResult<Engine> {
    Engine::new(hardware, policy, command_rx, event_tx)
}

//! Pipeline lifecycle orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use camstream_capture::{CallbackEnvelope, ControllerOutcome};
use camstream_encoder::{EncoderConfig, MIME_AVC};
use camstream_ipc::{
    Destination, EngineEvent, PipelinePolicy, PipelineState, SessionErrorAction, StartupPhase,
    StopReason, StreamConfig, StreamMetrics,
};
use camstream_transport::SinkOptions;

use crate::drain::{DrainContext, DrainHandle};
use crate::error::PipelineError;
use crate::metrics::MetricsCollector;
use crate::state::SessionResources;
use crate::{Hardware, PipelineResult};

/// How often the dispatcher checks for shutdown while idle.
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Binds a camera session, an encoder, and a datagram sink into one stream.
///
/// `start` acquires resources in dependency order and returns once the
/// camera open is in flight; the camera's asynchronous callbacks carry the
/// session the rest of the way to `Live` on a dispatcher thread. `stop`
/// releases everything in reverse order. Both are idempotent.
pub struct Pipeline {
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<()>>,
}

struct Shared {
    hardware: Hardware,
    policy: PipelinePolicy,
    events: Sender<EngineEvent>,
    faults: Sender<String>,
    inner: Mutex<PipelineInner>,
    shutdown: AtomicBool,
}

struct PipelineInner {
    state: PipelineState,
    resources: SessionResources,
    session: Option<(Destination, StreamConfig)>,
    metrics: Arc<MetricsCollector>,
}

impl Pipeline {
    /// Create an idle pipeline that reports to `events`.
    pub fn new(
        hardware: Hardware,
        policy: PipelinePolicy,
        events: Sender<EngineEvent>,
    ) -> PipelineResult<Self> {
        let (callbacks_tx, callbacks_rx) = crossbeam_channel::unbounded();
        let (faults_tx, faults_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            hardware,
            policy,
            events,
            faults: faults_tx,
            inner: Mutex::new(PipelineInner {
                state: PipelineState::Idle,
                resources: SessionResources::new(callbacks_tx),
                session: None,
                metrics: Arc::new(MetricsCollector::default()),
            }),
            shutdown: AtomicBool::new(false),
        });

        let dispatch_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name("camera-callbacks".to_string())
            .spawn(move || dispatch_loop(dispatch_shared, callbacks_rx, faults_rx))
            .map_err(|source| PipelineError::Spawn {
                name: "camera-callbacks",
                source,
            })?;

        Ok(Self {
            shared,
            dispatcher: Some(dispatcher),
        })
    }

    /// Bring the pipeline up. A no-op while already running.
    ///
    /// Fails without retaining any resource if no camera exists or any
    /// synchronous step is refused; the pipeline is then in `Error`.
    #[instrument(name = "pipeline_start", skip_all, fields(destination = %destination))]
    pub fn start(&self, destination: Destination, config: StreamConfig) -> PipelineResult<()> {
        let mut inner = self.shared.inner.lock();

        if inner.state.is_running() {
            debug!(state = inner.state.name(), "Already running, ignoring start");
            return Ok(());
        }

        info!(
            width = config.width,
            height = config.height,
            bitrate = config.bitrate_bps,
            fps = config.frame_rate,
            "Starting pipeline"
        );

        match self.shared.bring_up(&mut inner, &destination, &config) {
            Ok(()) => {
                inner.session = Some((destination, config));
                Ok(())
            }
            Err(e) => {
                error!("Pipeline start failed: {}", e);
                let PipelineInner {
                    resources, metrics, ..
                } = &mut *inner;
                resources.teardown(|_| {});
                metrics.stop();
                self.shared.transition(
                    &mut inner.state,
                    PipelineState::Error {
                        message: e.to_string(),
                        recoverable: true,
                    },
                );
                Err(e)
            }
        }
    }

    /// Tear the pipeline down. A no-op unless running.
    #[instrument(name = "pipeline_stop", skip(self))]
    pub fn stop(&self) {
        self.shared.stop(StopReason::UserRequested);
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.shared.inner.lock().state.clone()
    }

    /// Metrics of the current or most recent session.
    pub fn metrics(&self) -> StreamMetrics {
        self.metrics_collector().snapshot()
    }

    /// Collector of the current or most recent session.
    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.shared.inner.lock().metrics)
    }

    /// Policy this pipeline was created with.
    pub fn policy(&self) -> &PipelinePolicy {
        &self.shared.policy
    }

    /// Stop streaming and join the dispatcher thread.
    pub fn shutdown(&mut self) {
        self.shared.stop(StopReason::Shutdown);
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!("Camera callback dispatcher panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn bring_up(
        &self,
        inner: &mut PipelineInner,
        destination: &Destination,
        config: &StreamConfig,
    ) -> PipelineResult<()> {
        let PipelineInner {
            state,
            resources,
            metrics,
            ..
        } = inner;

        self.enter(state, StartupPhase::ResolveCamera);
        let camera_id = self
            .hardware
            .cameras
            .camera_ids()?
            .into_iter()
            .next()
            .ok_or(PipelineError::NoCamera)?;
        debug!(camera_id = %camera_id, "Camera selected");

        self.enter(state, StartupPhase::OpenEndpoint);
        let sink = self
            .hardware
            .sinks
            .open(destination, &SinkOptions::from(&self.policy))?;
        resources.sink = Some(Arc::clone(&sink));

        self.enter(state, StartupPhase::ConfigureEncoder);
        let encoder = self.hardware.encoders.create_encoder(MIME_AVC)?;
        resources.encoder = Some(Arc::clone(&encoder));
        encoder.configure(&EncoderConfig::from(config))?;
        let surface = encoder.create_input_surface()?;
        resources.surface = Some(surface.clone());
        encoder.start()?;
        info!(encoder = encoder.name(), "Encoder started");

        self.enter(state, StartupPhase::StartDrain);
        *metrics = Arc::new(MetricsCollector::new(config.bitrate_bps));
        metrics.start();
        resources.drain = Some(DrainHandle::spawn(DrainContext {
            encoder,
            sink,
            metrics: Arc::clone(metrics),
            events: self.events.clone(),
            faults: self.faults.clone(),
            poll_timeout: Duration::from_millis(self.policy.drain_poll_timeout_ms),
        })?);

        self.enter(state, StartupPhase::OpenCamera);
        resources
            .controller
            .open(self.hardware.cameras.as_ref(), &camera_id, surface)?;

        Ok(())
    }

    fn stop(&self, reason: StopReason) {
        let mut inner = self.inner.lock();

        if inner.state.is_error() {
            self.transition(&mut inner.state, PipelineState::Idle);
            return;
        }
        if !inner.state.is_running() {
            debug!(state = inner.state.name(), "Not running, ignoring stop");
            return;
        }

        info!(reason = %reason.message(), "Stopping pipeline");
        self.teardown(&mut inner, reason);
        self.transition(&mut inner.state, PipelineState::Idle);
        info!("Pipeline stopped");
    }

    fn teardown(&self, inner: &mut PipelineInner, reason: StopReason) {
        let PipelineInner {
            state,
            resources,
            session,
            metrics,
        } = inner;

        resources.teardown(|phase| {
            self.transition(
                state,
                PipelineState::Stopping {
                    reason: reason.clone(),
                    phase,
                },
            )
        });
        metrics.stop();
        *session = None;
    }

    fn on_callback(&self, envelope: CallbackEnvelope) {
        let mut inner = self.inner.lock();

        match inner.resources.controller.handle(envelope) {
            ControllerOutcome::Ignored => {}
            ControllerOutcome::Configuring => {
                if inner.state.is_starting() {
                    self.enter(&mut inner.state, StartupPhase::ConfigureSession);
                }
            }
            ControllerOutcome::Active => {
                if !inner.state.is_starting() {
                    return;
                }
                self.enter(&mut inner.state, StartupPhase::StartRepeating);
                if let Some((destination, config)) = inner.session.clone() {
                    info!(destination = %destination, "Pipeline live");
                    self.transition(
                        &mut inner.state,
                        PipelineState::Live {
                            destination,
                            config,
                        },
                    );
                }
            }
            ControllerOutcome::Idle(e) => {
                self.on_session_failure(&mut inner, StopReason::SessionError {
                    message: e.to_string(),
                });
            }
            ControllerOutcome::Failed(e) => {
                self.on_session_failure(&mut inner, StopReason::CameraError {
                    message: e.to_string(),
                });
            }
        }
    }

    fn on_session_failure(&self, inner: &mut PipelineInner, reason: StopReason) {
        if !inner.state.is_running() {
            return;
        }

        let message = reason.message();
        error!(message = %message, "Capture session failed");
        self.send_event(EngineEvent::Error {
            recoverable: true,
            message: message.clone(),
        });

        match self.policy.session_errors {
            SessionErrorAction::Teardown => {
                self.teardown(inner, reason);
                self.transition(
                    &mut inner.state,
                    PipelineState::Error {
                        message,
                        recoverable: true,
                    },
                );
            }
            SessionErrorAction::Stall => {
                warn!("Session stalled, waiting for stop");
                self.transition(&mut inner.state, PipelineState::Stalled { reason: message });
            }
        }
    }

    fn on_drain_fault(&self, message: String) {
        let mut inner = self.inner.lock();
        if inner.state.is_running() {
            self.transition(&mut inner.state, PipelineState::Stalled { reason: message });
        }
    }

    fn enter(&self, state: &mut PipelineState, phase: StartupPhase) {
        debug!(phase = phase.name(), "Startup phase");
        self.transition(state, PipelineState::Starting { phase });
    }

    fn transition(&self, state: &mut PipelineState, new_state: PipelineState) {
        let previous = std::mem::replace(state, new_state.clone());

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

/// Apply camera callbacks and drain faults until shutdown.
fn dispatch_loop(
    shared: Arc<Shared>,
    callbacks: Receiver<CallbackEnvelope>,
    faults: Receiver<String>,
) {
    debug!("Callback dispatcher starting");

    while !shared.shutdown.load(Ordering::SeqCst) {
        select! {
            recv(callbacks) -> envelope => match envelope {
                Ok(envelope) => shared.on_callback(envelope),
                Err(_) => break,
            },
            recv(faults) -> fault => {
                if let Ok(message) = fault {
                    shared.on_drain_fault(message);
                }
            },
            default(DISPATCH_POLL_INTERVAL) => {}
        }
    }

    // Whatever is still queued belongs to a session that no longer exists.
    while let Ok(envelope) = callbacks.try_recv() {
        envelope.event.discard();
    }

    debug!("Callback dispatcher stopped");
}

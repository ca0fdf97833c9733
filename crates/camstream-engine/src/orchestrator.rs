//! Command-driven engine loop.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, instrument, warn};

use camstream_ipc::{Destination, EngineCommand, EngineEvent, PipelinePolicy, StreamConfig};

use crate::pipeline::Pipeline;
use crate::{Hardware, PipelineResult};

/// How long the loop waits for a command before doing housekeeping.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between metrics events while live.
const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Drives a [`Pipeline`] from operator commands and reports events back.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    pipeline: Pipeline,
    last_metrics: Instant,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        hardware: Hardware,
        policy: PipelinePolicy,
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
    ) -> PipelineResult<Self> {
        let pipeline = Pipeline::new(hardware, policy, event_tx.clone())?;

        Ok(Self {
            command_rx,
            event_tx,
            pipeline,
            last_metrics: Instant::now(),
        })
    }

    /// The pipeline this engine drives.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(COMMAND_POLL_INTERVAL) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.pipeline.shutdown();
                    break;
                }
            }

            if self.pipeline.state().is_live() && self.last_metrics.elapsed() >= METRICS_INTERVAL {
                self.emit_metrics();
            }
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::Start {
                destination,
                config,
            } => self.start_stream(destination, config),
            EngineCommand::Stop => self.pipeline.stop(),
            EngineCommand::GetState => self.send_state(),
            EngineCommand::GetMetrics => self.emit_metrics(),
            EngineCommand::Shutdown => {
                self.pipeline.shutdown();
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    fn start_stream(&mut self, destination: Destination, config: StreamConfig) {
        match self.pipeline.start(destination, config) {
            Ok(()) => self.last_metrics = Instant::now(),
            Err(e) => self.send_event(EngineEvent::Error {
                recoverable: true,
                message: e.to_string(),
            }),
        }
    }

    fn send_state(&self) {
        let state = self.pipeline.state();
        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn emit_metrics(&mut self) {
        let metrics = self.pipeline.metrics_collector();
        self.send_event(EngineEvent::Metrics(metrics.snapshot()));

        for warning in metrics.check_warnings() {
            self.send_event(EngineEvent::PerformanceWarning(warning));
        }

        metrics.mark_reported();
        self.last_metrics = Instant::now();
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

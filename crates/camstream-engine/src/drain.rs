//! Encoder drain loop.
//!
//! A dedicated thread polls the encoder for finished output buffers and
//! forwards each non-empty payload to the sink as one datagram. Every
//! dequeued buffer is released exactly once, whatever happens to its
//! payload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, instrument, trace, warn};

use camstream_encoder::{DequeueOutcome, EncoderError, HardwareEncoder, OutputBuffer};
use camstream_ipc::EngineEvent;
use camstream_transport::{DatagramSink, TransportError, MAX_DATAGRAM_PAYLOAD};

use crate::error::PipelineError;
use crate::metrics::MetricsCollector;
use crate::PipelineResult;

/// Everything the drain thread touches.
pub(crate) struct DrainContext {
    pub encoder: Arc<dyn HardwareEncoder>,
    pub sink: Arc<dyn DatagramSink>,
    pub metrics: Arc<MetricsCollector>,
    pub events: Sender<EngineEvent>,
    pub faults: Sender<String>,
    pub poll_timeout: Duration,
}

/// Handle to a running drain thread.
pub(crate) struct DrainHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<u64>>,
}

impl DrainHandle {
    /// Spawn the drain thread.
    pub fn spawn(context: DrainContext) -> PipelineResult<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);

        let thread = thread::Builder::new()
            .name("encoder-drain".to_string())
            .spawn(move || drain_loop(context, thread_cancel))
            .map_err(|source| PipelineError::Spawn {
                name: "encoder-drain",
                source,
            })?;

        Ok(Self {
            cancel,
            thread: Some(thread),
        })
    }

    /// Cancel the loop and wait for it to exit.
    #[instrument(name = "drain_stop", skip(self))]
    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(iterations) => debug!(iterations, "Drain thread joined"),
                Err(_) => error!("Drain thread panicked"),
            }
        }
    }
}

impl Drop for DrainHandle {
    fn drop(&mut self) {
        self.join();
    }
}

fn drain_loop(context: DrainContext, cancel: Arc<AtomicBool>) -> u64 {
    debug!(poll_timeout = ?context.poll_timeout, "Drain loop starting");
    let mut iterations: u64 = 0;

    while !cancel.load(Ordering::SeqCst) {
        iterations += 1;

        match context.encoder.dequeue_output(context.poll_timeout) {
            Ok(DequeueOutcome::Buffer(buffer)) => forward_buffer(&context, buffer),
            Ok(DequeueOutcome::TryAgainLater) => {
                trace!("No encoder output yet");
            }
            Ok(DequeueOutcome::FormatChanged(format)) => {
                info!(
                    mime = %format.mime,
                    width = format.width,
                    height = format.height,
                    codec_data = format.codec_data.len(),
                    "Encoder output format changed"
                );
                context.metrics.record_format_change();
            }
            Err(EncoderError::Released | EncoderError::NotStarted) => {
                debug!("Encoder no longer running, drain loop exiting");
                break;
            }
            Err(e) => {
                error!("Encoder output failed: {}", e);
                let message = format!("Encoder output failed: {}", e);
                if let Err(e) = context.events.try_send(EngineEvent::Error {
                    recoverable: false,
                    message: message.clone(),
                }) {
                    warn!("Failed to send event: {}", e);
                }
                let _ = context.faults.send(message);
                break;
            }
        }
    }

    debug!(iterations, "Drain loop stopped");
    iterations
}

fn forward_buffer(context: &DrainContext, buffer: OutputBuffer) {
    let size = buffer.info.size.min(buffer.data.len());

    if size > 0 {
        let payload = &buffer.data[..size];
        if size > MAX_DATAGRAM_PAYLOAD {
            context.metrics.record_oversized();
        }

        match context.sink.send(payload) {
            Ok(sent) => context.metrics.record_datagram(sent),
            Err(TransportError::Oversized { size, limit }) => {
                debug!(size, limit, "Dropped oversized payload");
            }
            Err(e) => {
                warn!(size, index = buffer.index, "Failed to send datagram: {}", e);
                context.metrics.record_send_failure();
            }
        }

        if buffer.info.flags.key_frame {
            context.metrics.record_keyframe();
        }
    } else {
        trace!(index = buffer.index, "Releasing empty output buffer");
        context.metrics.record_empty_buffer();
    }

    match context.encoder.release_output(buffer.index) {
        Ok(()) => context.metrics.record_buffer_released(),
        Err(e) => warn!(index = buffer.index, "Failed to release output buffer: {}", e),
    }
}

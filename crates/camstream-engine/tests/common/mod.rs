//! Fake hardware layer for pipeline tests.
//!
//! Every fake counts the handles it has open and appends its teardown calls
//! to a shared log so tests can check ordering and leaks.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use camstream_capture::{
    CameraCallbacks, CameraCaptureSession, CameraDevice, CameraEvent, CameraProvider,
    CaptureError, CaptureRequest, CaptureResult,
};
use camstream_encoder::{
    BufferFlags, BufferInfo, DequeueOutcome, EncoderConfig, EncoderError, EncoderFactory,
    EncoderResult, EncoderState, HardwareEncoder, InputSurface, OutputBuffer, OutputFormat,
    MIME_AVC,
};
use camstream_engine::Hardware;
use camstream_ipc::{Destination, EngineEvent, PipelineState};
use camstream_transport::{DatagramSink, SinkFactory, SinkOptions, TransportError, TransportResult};
use crossbeam_channel::Receiver;

pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Every event received so far.
pub fn drain_events(events: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
    events.try_iter().collect()
}

/// Current states of every `StateChanged` event.
pub fn states(events: &[EngineEvent]) -> Vec<PipelineState> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::StateChanged { current, .. } => Some((**current).clone()),
            _ => None,
        })
        .collect()
}

pub fn destination() -> Destination {
    Destination::new("127.0.0.1", 5000)
}

// ---------------------------------------------------------------------------
// Camera

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Callbacks are delivered as soon as the request is made.
    Immediate,

    /// The device-opened callback waits for [`FakeCameraProvider::complete_open`].
    Manual,
}

pub struct FakeCameraProvider {
    ids: Vec<String>,
    mode: OpenMode,
    log: CallLog,
    pub devices_open: Arc<AtomicUsize>,
    pub sessions_open: Arc<AtomicUsize>,
    pub fail_configure: Arc<AtomicBool>,
    pub deny_access: AtomicBool,
    pending: Mutex<Option<CameraCallbacks>>,
}

impl FakeCameraProvider {
    pub fn new(ids: &[&str], mode: OpenMode, log: CallLog) -> Self {
        Self {
            ids: ids.iter().map(|id| id.to_string()).collect(),
            mode,
            log,
            devices_open: Arc::new(AtomicUsize::new(0)),
            sessions_open: Arc::new(AtomicUsize::new(0)),
            fail_configure: Arc::new(AtomicBool::new(false)),
            deny_access: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    fn device(&self) -> Box<dyn CameraDevice> {
        self.devices_open.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeDevice {
            log: Arc::clone(&self.log),
            devices_open: Arc::clone(&self.devices_open),
            sessions_open: Arc::clone(&self.sessions_open),
            fail_configure: Arc::clone(&self.fail_configure),
            closed: false,
        })
    }

    /// Deliver the device-opened callback of the last open request.
    pub fn complete_open(&self) {
        let callbacks = self.pending.lock().clone();
        if let Some(callbacks) = callbacks {
            callbacks.deliver(CameraEvent::DeviceOpened(self.device()));
        }
    }

    /// Report a disconnect on the last open request.
    pub fn disconnect(&self) {
        let callbacks = self.pending.lock().clone();
        if let Some(callbacks) = callbacks {
            callbacks.deliver(CameraEvent::DeviceDisconnected);
        }
    }

    pub fn open_requests(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl CameraProvider for FakeCameraProvider {
    fn camera_ids(&self) -> CaptureResult<Vec<String>> {
        Ok(self.ids.clone())
    }

    fn open_camera(&self, camera_id: &str, callbacks: CameraCallbacks) -> CaptureResult<()> {
        if self.deny_access.load(Ordering::SeqCst) {
            return Err(CaptureError::AccessDenied(camera_id.to_string()));
        }
        if !self.ids.iter().any(|id| id == camera_id) {
            return Err(CaptureError::CameraNotFound(camera_id.to_string()));
        }
        *self.pending.lock() = Some(callbacks.clone());
        if self.mode == OpenMode::Immediate {
            callbacks.deliver(CameraEvent::DeviceOpened(self.device()));
        }
        Ok(())
    }
}

struct FakeDevice {
    log: CallLog,
    devices_open: Arc<AtomicUsize>,
    sessions_open: Arc<AtomicUsize>,
    fail_configure: Arc<AtomicBool>,
    closed: bool,
}

impl CameraDevice for FakeDevice {
    fn id(&self) -> &str {
        "0"
    }

    fn create_capture_session(
        &mut self,
        outputs: Vec<InputSurface>,
        callbacks: CameraCallbacks,
    ) -> CaptureResult<()> {
        assert_eq!(outputs.len(), 1);
        if self.fail_configure.load(Ordering::SeqCst) {
            callbacks.deliver(CameraEvent::SessionConfigureFailed);
            return Ok(());
        }

        self.sessions_open.fetch_add(1, Ordering::SeqCst);
        callbacks.deliver(CameraEvent::SessionConfigured(Box::new(FakeSession {
            log: Arc::clone(&self.log),
            sessions_open: Arc::clone(&self.sessions_open),
            closed: false,
        })));
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.devices_open.fetch_sub(1, Ordering::SeqCst);
            self.log.lock().push("close_device");
        }
    }
}

struct FakeSession {
    log: CallLog,
    sessions_open: Arc<AtomicUsize>,
    closed: bool,
}

impl CameraCaptureSession for FakeSession {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> CaptureResult<()> {
        assert_eq!(request.targets.len(), 1);
        self.log.lock().push("set_repeating");
        Ok(())
    }

    fn stop_repeating(&mut self) -> CaptureResult<()> {
        self.log.lock().push("stop_repeating");
        Ok(())
    }

    fn abort_captures(&mut self) -> CaptureResult<()> {
        self.log.lock().push("abort_captures");
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.sessions_open.fetch_sub(1, Ordering::SeqCst);
            self.log.lock().push("close_session");
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Format,
    Buffer(usize),
    Fail,
}

/// Encoder replaying a fixed script of outputs.
pub struct ScriptedEncoder {
    log: CallLog,
    state: Mutex<EncoderState>,
    config: Mutex<Option<EncoderConfig>>,
    surface: Mutex<Option<InputSurface>>,
    script: Mutex<VecDeque<Step>>,
    outstanding: Mutex<HashSet<usize>>,
    next_index: AtomicUsize,
    pub dequeued: AtomicUsize,
    pub released: AtomicUsize,
    pub bad_releases: AtomicUsize,
    reject_config: bool,
}

impl ScriptedEncoder {
    pub fn lifecycle(&self) -> EncoderState {
        *self.state.lock()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }
}

impl HardwareEncoder for ScriptedEncoder {
    fn configure(&self, config: &EncoderConfig) -> EncoderResult<()> {
        if self.reject_config {
            return Err(EncoderError::UnsupportedConfiguration(
                "scripted rejection".to_string(),
            ));
        }
        *self.config.lock() = Some(config.clone());
        *self.state.lock() = EncoderState::Configured;
        Ok(())
    }

    fn create_input_surface(&self) -> EncoderResult<InputSurface> {
        let config = self.config.lock().clone().ok_or(EncoderError::InvalidState {
            operation: "create_input_surface",
            state: self.lifecycle(),
        })?;
        let surface = InputSurface::new(config.width, config.height);
        *self.surface.lock() = Some(surface.clone());
        Ok(surface)
    }

    fn start(&self) -> EncoderResult<()> {
        *self.state.lock() = EncoderState::Started;
        Ok(())
    }

    fn dequeue_output(&self, timeout: Duration) -> EncoderResult<DequeueOutcome> {
        match self.lifecycle() {
            EncoderState::Started => {}
            EncoderState::Released => return Err(EncoderError::Released),
            _ => return Err(EncoderError::NotStarted),
        }

        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Format) => Ok(DequeueOutcome::FormatChanged(OutputFormat {
                mime: MIME_AVC.to_string(),
                width: 16,
                height: 8,
                codec_data: Bytes::new(),
            })),
            Some(Step::Buffer(size)) => {
                let index = self.next_index.fetch_add(1, Ordering::SeqCst);
                self.outstanding.lock().insert(index);
                self.dequeued.fetch_add(1, Ordering::SeqCst);
                Ok(DequeueOutcome::Buffer(OutputBuffer {
                    index,
                    data: Bytes::from(vec![index as u8; size]),
                    info: BufferInfo {
                        size,
                        presentation_time_us: 0,
                        flags: BufferFlags::default(),
                    },
                }))
            }
            Some(Step::Fail) => Err(EncoderError::Encoding("scripted failure".to_string())),
            None => {
                thread::sleep(timeout);
                Ok(DequeueOutcome::TryAgainLater)
            }
        }
    }

    fn release_output(&self, index: usize) -> EncoderResult<()> {
        if self.outstanding.lock().remove(&index) {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            self.bad_releases.fetch_add(1, Ordering::SeqCst);
            Err(EncoderError::InvalidBuffer(index))
        }
    }

    fn output_format(&self) -> Option<OutputFormat> {
        None
    }

    fn stop(&self) -> EncoderResult<()> {
        self.log.lock().push("encoder_stop");
        let mut state = self.state.lock();
        if *state == EncoderState::Started {
            *state = EncoderState::Stopped;
        }
        Ok(())
    }

    fn release(&self) {
        self.log.lock().push("encoder_release");
        *self.state.lock() = EncoderState::Released;
        if let Some(surface) = self.surface.lock().take() {
            surface.release();
        }
    }

    fn state(&self) -> EncoderState {
        self.lifecycle()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct ScriptedEncoderFactory {
    log: CallLog,
    script: Vec<Step>,
    reject_config: bool,
    pub created: Mutex<Vec<Arc<ScriptedEncoder>>>,
}

impl ScriptedEncoderFactory {
    pub fn new(script: Vec<Step>, log: CallLog) -> Self {
        Self {
            log,
            script,
            reject_config: false,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(log: CallLog) -> Self {
        Self {
            reject_config: true,
            ..Self::new(Vec::new(), log)
        }
    }

    pub fn encoder(&self, n: usize) -> Arc<ScriptedEncoder> {
        Arc::clone(&self.created.lock()[n])
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }
}

impl EncoderFactory for ScriptedEncoderFactory {
    fn create_encoder(&self, mime: &str) -> EncoderResult<Arc<dyn HardwareEncoder>> {
        assert_eq!(mime, MIME_AVC);
        let encoder = Arc::new(ScriptedEncoder {
            log: Arc::clone(&self.log),
            state: Mutex::new(EncoderState::Created),
            config: Mutex::new(None),
            surface: Mutex::new(None),
            script: Mutex::new(self.script.iter().copied().collect()),
            outstanding: Mutex::new(HashSet::new()),
            next_index: AtomicUsize::new(0),
            dequeued: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            bad_releases: AtomicUsize::new(0),
            reject_config: self.reject_config,
        });
        self.created.lock().push(Arc::clone(&encoder));
        Ok(encoder)
    }
}

// ---------------------------------------------------------------------------
// Transport

/// Sink that keeps every payload it is given.
pub struct RecordingSink {
    log: CallLog,
    destination: Destination,
    closed: AtomicBool,
    fail_send: usize,
    attempts: AtomicUsize,
    pub payloads: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    pub fn sizes(&self) -> Vec<usize> {
        self.payloads.lock().iter().map(Vec::len).collect()
    }
}

impl DatagramSink for RecordingSink {
    fn send(&self, payload: &[u8]) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.attempts.fetch_add(1, Ordering::SeqCst) == self.fail_send {
            return Err(TransportError::SendFailed("network unreachable".to_string()));
        }
        self.payloads.lock().push(payload.to_vec());
        Ok(payload.len())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.lock().push("sink_close");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn destination(&self) -> &Destination {
        &self.destination
    }
}

pub struct RecordingSinkFactory {
    log: CallLog,
    fail_send: AtomicUsize,
    pub opened: Mutex<Vec<Arc<RecordingSink>>>,
}

impl RecordingSinkFactory {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_send: AtomicUsize::new(usize::MAX),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Make the `n`th send (zero based) of every sink opened from now on fail.
    pub fn fail_send(&self, n: usize) {
        self.fail_send.store(n, Ordering::SeqCst);
    }

    pub fn sink(&self, n: usize) -> Arc<RecordingSink> {
        Arc::clone(&self.opened.lock()[n])
    }

    pub fn count(&self) -> usize {
        self.opened.lock().len()
    }
}

impl SinkFactory for RecordingSinkFactory {
    fn open(
        &self,
        destination: &Destination,
        _options: &SinkOptions,
    ) -> TransportResult<Arc<dyn DatagramSink>> {
        let sink = Arc::new(RecordingSink {
            log: Arc::clone(&self.log),
            destination: destination.clone(),
            closed: AtomicBool::new(false),
            fail_send: self.fail_send.load(Ordering::SeqCst),
            attempts: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        });
        self.opened.lock().push(Arc::clone(&sink));
        Ok(sink)
    }
}

// ---------------------------------------------------------------------------

/// A complete fake device layer.
pub struct Fakes {
    pub log: CallLog,
    pub cameras: Arc<FakeCameraProvider>,
    pub encoders: Arc<ScriptedEncoderFactory>,
    pub sinks: Arc<RecordingSinkFactory>,
}

impl Fakes {
    pub fn new(camera_ids: &[&str], mode: OpenMode, script: Vec<Step>) -> Self {
        let log = CallLog::default();
        Self {
            cameras: Arc::new(FakeCameraProvider::new(camera_ids, mode, Arc::clone(&log))),
            encoders: Arc::new(ScriptedEncoderFactory::new(script, Arc::clone(&log))),
            sinks: Arc::new(RecordingSinkFactory::new(Arc::clone(&log))),
            log,
        }
    }

    pub fn hardware(&self) -> Hardware {
        Hardware::new(
            Arc::clone(&self.cameras) as Arc<dyn CameraProvider>,
            Arc::clone(&self.encoders) as Arc<dyn EncoderFactory>,
            Arc::clone(&self.sinks) as Arc<dyn SinkFactory>,
        )
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }

    /// No camera, encoder, or socket handle is held.
    pub fn all_released(&self) -> bool {
        self.cameras.devices_open.load(Ordering::SeqCst) == 0
            && self.cameras.sessions_open.load(Ordering::SeqCst) == 0
            && self
                .encoders
                .created
                .lock()
                .iter()
                .all(|e| e.lifecycle() == EncoderState::Released)
            && self.sinks.opened.lock().iter().all(|s| s.is_closed())
    }
}

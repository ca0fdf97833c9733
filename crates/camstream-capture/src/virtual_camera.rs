//! Virtual camera backend rendering a moving test pattern.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use camstream_encoder::{EncoderError, FrameTimestamp, InputSurface, SurfaceFrame};
use tracing::{debug, info, instrument, warn};

use crate::error::CaptureError;
use crate::{
    CameraCallbacks, CameraCaptureSession, CameraDevice, CameraEvent, CameraProvider,
    CaptureRequest, CaptureResult,
};

/// Virtual camera settings.
#[derive(Debug, Clone)]
pub struct VirtualCameraConfig {
    /// Advertised camera identifiers.
    pub camera_ids: Vec<String>,

    /// Time from open request to the device-opened callback.
    pub open_delay: Duration,

    /// Time from session request to the session-configured callback.
    pub configure_delay: Duration,

    /// Frames rendered per second while a repeating request runs.
    pub frame_rate: u32,

    /// Refuse every open with an access error.
    pub deny_access: bool,
}

impl Default for VirtualCameraConfig {
    fn default() -> Self {
        Self {
            camera_ids: vec!["0".to_string()],
            open_delay: Duration::from_millis(20),
            configure_delay: Duration::from_millis(10),
            frame_rate: 30,
            deny_access: false,
        }
    }
}

#[derive(Debug, Default)]
struct HandleCounts {
    devices: AtomicUsize,
    sessions: AtomicUsize,
}

/// Camera provider backed by virtual devices.
///
/// Open and configure complete on background threads after the configured
/// delays, the same way a real camera stack reports them.
#[derive(Debug, Clone)]
pub struct VirtualCameraProvider {
    config: VirtualCameraConfig,
    counts: Arc<HandleCounts>,
}

impl VirtualCameraProvider {
    pub fn new(config: VirtualCameraConfig) -> Self {
        Self {
            config,
            counts: Arc::new(HandleCounts::default()),
        }
    }

    /// Device handles currently open.
    pub fn open_devices(&self) -> usize {
        self.counts.devices.load(Ordering::SeqCst)
    }

    /// Session handles currently open.
    pub fn open_sessions(&self) -> usize {
        self.counts.sessions.load(Ordering::SeqCst)
    }
}

impl Default for VirtualCameraProvider {
    fn default() -> Self {
        Self::new(VirtualCameraConfig::default())
    }
}

impl CameraProvider for VirtualCameraProvider {
    fn camera_ids(&self) -> CaptureResult<Vec<String>> {
        Ok(self.config.camera_ids.clone())
    }

    #[instrument(name = "virtual_camera_open", skip(self, callbacks))]
    fn open_camera(&self, camera_id: &str, callbacks: CameraCallbacks) -> CaptureResult<()> {
        if self.config.deny_access {
            return Err(CaptureError::AccessDenied(camera_id.to_string()));
        }
        if !self.config.camera_ids.iter().any(|id| id == camera_id) {
            return Err(CaptureError::CameraNotFound(camera_id.to_string()));
        }

        let device = VirtualDevice {
            id: camera_id.to_string(),
            frame_rate: self.config.frame_rate.max(1),
            configure_delay: self.config.configure_delay,
            counts: Arc::clone(&self.counts),
            closed: true,
        };
        let delay = self.config.open_delay;

        thread::Builder::new()
            .name("virtual-camera-open".to_string())
            .spawn(move || {
                let mut device = device;
                thread::sleep(delay);
                device.closed = false;
                device.counts.devices.fetch_add(1, Ordering::SeqCst);
                callbacks.deliver(CameraEvent::DeviceOpened(Box::new(device)));
            })
            .map_err(|e| CaptureError::CameraAccess(e.to_string()))?;

        Ok(())
    }
}

struct VirtualDevice {
    id: String,
    frame_rate: u32,
    configure_delay: Duration,
    counts: Arc<HandleCounts>,
    closed: bool,
}

impl CameraDevice for VirtualDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: Vec<InputSurface>,
        callbacks: CameraCallbacks,
    ) -> CaptureResult<()> {
        if self.closed {
            return Err(CaptureError::CameraAccess("device closed".to_string()));
        }
        if outputs.is_empty() {
            return Err(CaptureError::CameraAccess(
                "session needs at least one output".to_string(),
            ));
        }

        let session = VirtualSession {
            outputs,
            frame_rate: self.frame_rate,
            counts: Arc::clone(&self.counts),
            render: None,
            closed: true,
        };
        let delay = self.configure_delay;

        thread::Builder::new()
            .name("virtual-camera-session".to_string())
            .spawn(move || {
                let mut session = session;
                thread::sleep(delay);
                session.closed = false;
                session.counts.sessions.fetch_add(1, Ordering::SeqCst);
                callbacks.deliver(CameraEvent::SessionConfigured(Box::new(session)));
            })
            .map_err(|e| CaptureError::CameraAccess(e.to_string()))?;

        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.counts.devices.fetch_sub(1, Ordering::SeqCst);
        debug!(camera_id = %self.id, "Virtual camera closed");
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        self.close();
    }
}

struct RenderThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct VirtualSession {
    outputs: Vec<InputSurface>,
    frame_rate: u32,
    counts: Arc<HandleCounts>,
    render: Option<RenderThread>,
    closed: bool,
}

impl VirtualSession {
    fn stop_render(&mut self) {
        if let Some(render) = self.render.take() {
            render.stop.store(true, Ordering::SeqCst);
            if render.handle.join().is_err() {
                warn!("Virtual camera render thread panicked");
            }
        }
    }
}

impl CameraCaptureSession for VirtualSession {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> CaptureResult<()> {
        if self.closed {
            return Err(CaptureError::SessionClosed);
        }
        if request.targets.is_empty() {
            return Err(CaptureError::RequestRejected("no targets".to_string()));
        }
        if let Some(target) = request
            .targets
            .iter()
            .find(|t| !self.outputs.iter().any(|o| o.id() == t.id()))
        {
            return Err(CaptureError::RequestRejected(format!(
                "surface {} is not a session output",
                target.id()
            )));
        }

        self.stop_render();

        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_secs(1) / self.frame_rate;
        let targets = request.targets;
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("virtual-camera-render".to_string())
            .spawn(move || render_loop(targets, interval, thread_stop))
            .map_err(|e| CaptureError::CameraAccess(e.to_string()))?;

        self.render = Some(RenderThread { stop, handle });
        info!(template = ?request.template, "Virtual camera streaming");
        Ok(())
    }

    fn stop_repeating(&mut self) -> CaptureResult<()> {
        if self.closed {
            return Err(CaptureError::SessionClosed);
        }
        self.stop_render();
        Ok(())
    }

    fn abort_captures(&mut self) -> CaptureResult<()> {
        if self.closed {
            return Err(CaptureError::SessionClosed);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop_render();
        self.closed = true;
        self.counts.sessions.fetch_sub(1, Ordering::SeqCst);
        debug!("Virtual capture session closed");
    }
}

impl Drop for VirtualSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn render_loop(targets: Vec<InputSurface>, interval: Duration, stop: Arc<AtomicBool>) {
    let start = Instant::now();
    let mut sequence = 0u64;

    while !stop.load(Ordering::SeqCst) {
        for target in &targets {
            let (width, height) = target.dimensions();
            let frame = SurfaceFrame::new(
                test_pattern(width, height, sequence),
                width,
                height,
                FrameTimestamp::now(start),
                sequence,
            );
            match target.render(frame) {
                Ok(()) => {}
                Err(EncoderError::SurfaceReleased) => {
                    debug!("Render target released, stopping");
                    return;
                }
                Err(e) => {
                    warn!("Failed to render frame: {}", e);
                    return;
                }
            }
        }
        sequence += 1;
        thread::sleep(interval);
    }
}

/// NV12 diagonal luma ramp that scrolls one pixel per frame.
fn test_pattern(width: u32, height: u32, sequence: u64) -> Bytes {
    let luma = (width * height) as usize;
    let mut data = vec![128u8; SurfaceFrame::nv12_buffer_size(width, height)];
    for (i, px) in data[..luma].iter_mut().enumerate() {
        let x = i as u64 % width as u64;
        let y = i as u64 / width as u64;
        *px = ((x + y + sequence) & 0xFF) as u8;
    }
    Bytes::from(data)
}

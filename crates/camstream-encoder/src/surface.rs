//! Encoder input surface.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, trace};

use crate::error::EncoderError;
use crate::frame::SurfaceFrame;
use crate::EncoderResult;

/// Frames queued between producer and encoder before the oldest is dropped.
pub const SURFACE_QUEUE_DEPTH: usize = 3;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Off-screen render target shared by a camera session and an encoder.
///
/// The camera renders frames in, the encoder acquires them. When the encoder
/// falls behind, the oldest queued frame is dropped. After [`release`] every
/// render fails with [`EncoderError::SurfaceReleased`].
///
/// [`release`]: InputSurface::release
#[derive(Clone)]
pub struct InputSurface {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    id: u64,
    width: u32,
    height: u32,
    sender: Sender<SurfaceFrame>,
    receiver: Receiver<SurfaceFrame>,
    released: AtomicBool,
    rendered: AtomicU64,
    dropped: AtomicU64,
}

impl InputSurface {
    /// Create a surface for frames of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(SURFACE_QUEUE_DEPTH);
        let id = NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(id, width, height, "Input surface created");

        Self {
            inner: Arc::new(SurfaceInner {
                id,
                width,
                height,
                sender,
                receiver,
                released: AtomicBool::new(false),
                rendered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Unique surface identifier.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Expected frame dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.inner.width, self.inner.height)
    }

    /// Render a frame into the surface.
    pub fn render(&self, frame: SurfaceFrame) -> EncoderResult<()> {
        if self.is_released() {
            return Err(EncoderError::SurfaceReleased);
        }

        if (frame.width, frame.height) != self.dimensions() || !frame.is_valid() {
            return Err(EncoderError::InvalidInput(format!(
                "Expected {}x{} NV12 frame, got {}x{} with {} bytes",
                self.inner.width,
                self.inner.height,
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let mut pending = frame;
        loop {
            match self.inner.sender.try_send(pending) {
                Ok(()) => {
                    self.inner.rendered.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(TrySendError::Full(frame)) => {
                    if let Ok(stale) = self.inner.receiver.try_recv() {
                        trace!(sequence = stale.sequence, "Surface full, dropping oldest frame");
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    pending = frame;
                }
                Err(TrySendError::Disconnected(_)) => return Err(EncoderError::SurfaceReleased),
            }
        }
    }

    /// Take the oldest rendered frame, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout or once the surface is released.
    pub fn acquire(&self, timeout: Duration) -> Option<SurfaceFrame> {
        if self.is_released() {
            return None;
        }
        self.inner.receiver.recv_timeout(timeout).ok()
    }

    /// Release the surface and discard queued frames.
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        while self.inner.receiver.try_recv().is_ok() {}
        debug!(id = self.inner.id, "Input surface released");
    }

    /// Check if the surface has been released.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Frames accepted by [`render`](Self::render).
    pub fn frames_rendered(&self) -> u64 {
        self.inner.rendered.load(Ordering::Relaxed)
    }

    /// Frames discarded because the encoder fell behind.
    pub fn frames_dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for InputSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSurface")
            .field("id", &self.inner.id)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("released", &self.is_released())
            .finish()
    }
}

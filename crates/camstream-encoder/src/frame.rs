//! Frames rendered into an encoder input surface.

use bytes::Bytes;
use std::time::Instant;

/// Timestamp for a rendered frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameTimestamp {
    /// Monotonic timestamp when the frame was rendered.
    pub render_time: Instant,

    /// Presentation timestamp in microseconds since capture start.
    pub pts_us: u64,
}

impl FrameTimestamp {
    /// Create a timestamp relative to `start_time`.
    pub fn now(start_time: Instant) -> Self {
        let render_time = Instant::now();
        let elapsed = render_time.duration_since(start_time);

        Self {
            render_time,
            pts_us: elapsed.as_micros() as u64,
        }
    }
}

/// A frame rendered into an [`InputSurface`](crate::InputSurface).
#[derive(Debug, Clone)]
pub struct SurfaceFrame {
    /// NV12 pixel data.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Render timestamp.
    pub timestamp: FrameTimestamp,

    /// Monotonically increasing sequence number.
    pub sequence: u64,
}

impl SurfaceFrame {
    /// Create a new frame.
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        timestamp: FrameTimestamp,
        sequence: u64,
    ) -> Self {
        Self {
            data,
            width,
            height,
            timestamp,
            sequence,
        }
    }

    /// Calculate expected NV12 buffer size for given dimensions.
    pub fn nv12_buffer_size(width: u32, height: u32) -> usize {
        // NV12: Y plane (width * height) + UV plane (width * height / 2)
        let y_size = (width * height) as usize;
        y_size + y_size / 2
    }

    /// Validate that the frame data matches expected dimensions.
    pub fn is_valid(&self) -> bool {
        self.data.len() == Self::nv12_buffer_size(self.width, self.height)
    }
}

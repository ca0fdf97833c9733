//! Surface-input video encoding.
//!
//! This crate defines the hardware encoder boundary used by the pipeline:
//! an encoder is configured for a codec and format, hands out an
//! [`InputSurface`] the camera renders into, and exposes its encoded output
//! through a dequeue/release buffer protocol. Every dequeued buffer must be
//! released exactly once or the encoder's output pool runs dry.

mod adapter;
mod error;
mod frame;
mod output;
mod surface;
mod synthetic;
#[cfg(feature = "x264")]
mod x264_codec;

pub use adapter::{validate_config, EncodedUnit, FrameCodec, SurfaceEncoder};
pub use error::EncoderError;
pub use frame::{FrameTimestamp, SurfaceFrame};
pub use output::OutputPool;
pub use surface::{InputSurface, SURFACE_QUEUE_DEPTH};
pub use synthetic::{SyntheticCodec, SyntheticEncoder, SyntheticEncoderFactory};
#[cfg(feature = "x264")]
pub use x264_codec::{X264Codec, X264Encoder, X264EncoderFactory};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use camstream_ipc::StreamConfig;

/// MIME type of the advanced video coding (H.264) encoder.
pub const MIME_AVC: &str = "video/avc";

/// Number of output buffers an encoder can have dequeued at once.
pub const OUTPUT_POOL_CAPACITY: usize = 4;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// How frames reach the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    /// Frames are rendered into the encoder's input surface.
    Surface,
}

/// H.264 profile levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Codec MIME type.
    pub mime: String,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Target bitrate in bits per second.
    pub bitrate_bps: u32,

    /// Target frames per second.
    pub frame_rate: u32,

    /// Keyframe interval in seconds.
    pub keyframe_interval_secs: u32,

    /// Input color format.
    pub color_format: ColorFormat,

    /// H.264 profile.
    pub profile: H264Profile,
}

impl EncoderConfig {
    /// Frames between forced keyframes.
    pub fn keyframe_interval_frames(&self) -> u64 {
        (self.frame_rate as u64 * self.keyframe_interval_secs as u64).max(1)
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for EncoderConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            mime: MIME_AVC.to_string(),
            width: config.width,
            height: config.height,
            bitrate_bps: config.bitrate_bps,
            frame_rate: config.frame_rate,
            keyframe_interval_secs: config.keyframe_interval_secs,
            color_format: ColorFormat::Surface,
            profile: H264Profile::Baseline,
        }
    }
}

/// Encoder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Created,
    Configured,
    Started,
    Stopped,
    Released,
}

/// Metadata flags of one output buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Buffer holds a keyframe.
    pub key_frame: bool,

    /// Buffer holds codec configuration (SPS/PPS) rather than a frame.
    pub codec_config: bool,
}

/// Metadata of one output buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    /// Payload size in bytes.
    pub size: usize,

    /// Presentation timestamp in microseconds.
    pub presentation_time_us: u64,

    /// Buffer flags.
    pub flags: BufferFlags,
}

/// One encoder-produced buffer, owned by the caller until released.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    /// Pool index; pass to [`HardwareEncoder::release_output`].
    pub index: usize,

    /// Encoded payload (Annex-B).
    pub data: Bytes,

    /// Buffer metadata.
    pub info: BufferInfo,
}

/// Format of the encoder's output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    /// Codec MIME type.
    pub mime: String,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Codec-specific data (SPS/PPS in Annex-B), if known.
    pub codec_data: Bytes,
}

/// Result of one output poll.
#[derive(Debug, Clone)]
pub enum DequeueOutcome {
    /// A buffer is ready; it must be released exactly once.
    Buffer(OutputBuffer),

    /// Nothing was produced within the timeout.
    TryAgainLater,

    /// The output format changed; informational.
    FormatChanged(OutputFormat),
}

/// A surface-input video encoder.
///
/// Methods take `&self` so the drain loop and the orchestrator can share one
/// instance. Calls against a stopped or released encoder return an error.
pub trait HardwareEncoder: Send + Sync {
    /// Configure codec and format. Valid once, from `Created`.
    fn configure(&self, config: &EncoderConfig) -> EncoderResult<()>;

    /// Create the surface the camera renders into. Valid after `configure`.
    fn create_input_surface(&self) -> EncoderResult<InputSurface>;

    /// Allocate buffers and begin accepting rendered frames.
    fn start(&self) -> EncoderResult<()>;

    /// Poll for one output buffer, waiting at most `timeout`.
    fn dequeue_output(&self, timeout: Duration) -> EncoderResult<DequeueOutcome>;

    /// Return a dequeued buffer to the pool.
    fn release_output(&self, index: usize) -> EncoderResult<()>;

    /// Current output format, once known.
    fn output_format(&self) -> Option<OutputFormat>;

    /// Stop encoding. Buffers still dequeued become invalid.
    fn stop(&self) -> EncoderResult<()>;

    /// Release every underlying resource, including the input surface.
    fn release(&self);

    /// Current lifecycle state.
    fn state(&self) -> EncoderState;

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Creates encoders by codec MIME type.
pub trait EncoderFactory: Send + Sync {
    /// Create an unconfigured encoder for `mime`.
    fn create_encoder(&self, mime: &str) -> EncoderResult<Arc<dyn HardwareEncoder>>;
}

/// Encoder factory preferring x264 with the synthetic encoder as fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEncoderFactory;

impl EncoderFactory for DefaultEncoderFactory {
    #[cfg(feature = "x264")]
    fn create_encoder(&self, mime: &str) -> EncoderResult<Arc<dyn HardwareEncoder>> {
        match X264EncoderFactory.create_encoder(mime) {
            Ok(encoder) => {
                tracing::info!("Using x264 encoder");
                Ok(encoder)
            }
            Err(e) => {
                tracing::warn!("x264 not available: {}, falling back to synthetic encoder", e);
                SyntheticEncoderFactory.create_encoder(mime)
            }
        }
    }

    #[cfg(not(feature = "x264"))]
    fn create_encoder(&self, mime: &str) -> EncoderResult<Arc<dyn HardwareEncoder>> {
        tracing::info!("Using synthetic encoder");
        SyntheticEncoderFactory.create_encoder(mime)
    }
}

//! Generic surface-input encoder built on a per-frame codec.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace};

use crate::error::EncoderError;
use crate::frame::SurfaceFrame;
use crate::output::OutputPool;
use crate::surface::InputSurface;
use crate::{
    BufferFlags, BufferInfo, DequeueOutcome, EncoderConfig, EncoderResult, EncoderState,
    HardwareEncoder, OutputBuffer, OutputFormat, MIME_AVC, OUTPUT_POOL_CAPACITY,
};

/// Largest frame size accepted by any codec.
pub const MAX_DIMENSION: u32 = 4096;

/// Highest accepted frame rate.
pub const MAX_FRAME_RATE: u32 = 120;

/// One unit of codec output.
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    /// Annex-B payload.
    pub data: Bytes,

    /// Whether the unit is a keyframe.
    pub is_keyframe: bool,
}

/// Per-frame H.264 codec driven by [`SurfaceEncoder`].
pub trait FrameCodec: Send + Sized + 'static {
    /// Codec name for diagnostics.
    const NAME: &'static str;

    /// Open the codec for a validated configuration.
    fn open(config: &EncoderConfig) -> EncoderResult<Self>;

    /// SPS/PPS in Annex-B.
    fn headers(&mut self) -> Bytes;

    /// Encode one frame. `Ok(None)` means the codec buffered it.
    fn encode(
        &mut self,
        frame: &SurfaceFrame,
        force_keyframe: bool,
    ) -> EncoderResult<Option<EncodedUnit>>;
}

/// Reject formats no codec in this crate can produce.
pub fn validate_config(config: &EncoderConfig) -> EncoderResult<()> {
    if config.mime != MIME_AVC {
        return Err(EncoderError::UnsupportedCodec(config.mime.clone()));
    }
    if config.width == 0 || config.height == 0 {
        return Err(EncoderError::UnsupportedConfiguration(format!(
            "{}x{} has a zero dimension",
            config.width, config.height
        )));
    }
    if config.width % 2 != 0 || config.height % 2 != 0 {
        return Err(EncoderError::UnsupportedConfiguration(format!(
            "{}x{} is not 4:2:0 aligned",
            config.width, config.height
        )));
    }
    if config.width > MAX_DIMENSION || config.height > MAX_DIMENSION {
        return Err(EncoderError::UnsupportedConfiguration(format!(
            "{}x{} exceeds {}x{}",
            config.width, config.height, MAX_DIMENSION, MAX_DIMENSION
        )));
    }
    if config.frame_rate == 0 || config.frame_rate > MAX_FRAME_RATE {
        return Err(EncoderError::UnsupportedConfiguration(format!(
            "frame rate {} outside 1..={}",
            config.frame_rate, MAX_FRAME_RATE
        )));
    }
    if config.bitrate_bps == 0 {
        return Err(EncoderError::UnsupportedConfiguration(
            "bitrate must be positive".to_string(),
        ));
    }
    Ok(())
}

struct PendingOutput {
    data: Bytes,
    presentation_time_us: u64,
    flags: BufferFlags,
}

struct EncoderInner<C> {
    state: EncoderState,
    config: Option<EncoderConfig>,
    surface: Option<InputSurface>,
    codec: Option<C>,
    pool: OutputPool,
    ready: VecDeque<PendingOutput>,
    pending_format: Option<OutputFormat>,
    format: Option<OutputFormat>,
    frames_encoded: u64,
}

impl<C> EncoderInner<C> {
    fn ensure_started(&self) -> EncoderResult<()> {
        match self.state {
            EncoderState::Started => Ok(()),
            EncoderState::Released => Err(EncoderError::Released),
            _ => Err(EncoderError::NotStarted),
        }
    }

    fn next_ready_buffer(&mut self) -> Option<OutputBuffer> {
        if self.ready.is_empty() {
            return None;
        }
        let index = self.pool.acquire()?;
        let pending = self.ready.pop_front()?;

        Some(OutputBuffer {
            index,
            info: BufferInfo {
                size: pending.data.len(),
                presentation_time_us: pending.presentation_time_us,
                flags: pending.flags,
            },
            data: pending.data,
        })
    }
}

/// Surface-input encoder: owns the input surface, the output pool and the
/// lifecycle, and delegates per-frame work to a [`FrameCodec`].
pub struct SurfaceEncoder<C: FrameCodec> {
    inner: Mutex<EncoderInner<C>>,
}

impl<C: FrameCodec> SurfaceEncoder<C> {
    /// Create an unconfigured encoder with the default output pool.
    pub fn new() -> Self {
        Self::with_pool_capacity(OUTPUT_POOL_CAPACITY)
    }

    /// Create an unconfigured encoder with `capacity` output buffers.
    pub fn with_pool_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(EncoderInner {
                state: EncoderState::Created,
                config: None,
                surface: None,
                codec: None,
                pool: OutputPool::new(capacity),
                ready: VecDeque::new(),
                pending_format: None,
                format: None,
                frames_encoded: 0,
            }),
        }
    }

    /// Output buffers currently dequeued and not yet released.
    pub fn buffers_in_flight(&self) -> usize {
        self.inner.lock().pool.in_flight()
    }

    /// Frames consumed from the input surface.
    pub fn frames_encoded(&self) -> u64 {
        self.inner.lock().frames_encoded
    }
}

impl<C: FrameCodec> Default for SurfaceEncoder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: FrameCodec> HardwareEncoder for SurfaceEncoder<C> {
    #[instrument(name = "encoder_configure", skip_all, fields(codec = C::NAME))]
    fn configure(&self, config: &EncoderConfig) -> EncoderResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != EncoderState::Created {
            return Err(EncoderError::InvalidState {
                operation: "configure",
                state: inner.state,
            });
        }

        validate_config(config)?;

        debug!(
            width = config.width,
            height = config.height,
            fps = config.frame_rate,
            bitrate_bps = config.bitrate_bps,
            keyframe_interval_secs = config.keyframe_interval_secs,
            "Encoder configured"
        );

        inner.config = Some(config.clone());
        inner.state = EncoderState::Configured;
        Ok(())
    }

    fn create_input_surface(&self) -> EncoderResult<InputSurface> {
        let mut inner = self.inner.lock();
        if inner.state != EncoderState::Configured {
            return Err(EncoderError::InvalidState {
                operation: "create input surface for",
                state: inner.state,
            });
        }
        let config = inner.config.as_ref().ok_or(EncoderError::NotStarted)?;

        let surface = InputSurface::new(config.width, config.height);
        inner.surface = Some(surface.clone());
        Ok(surface)
    }

    #[instrument(name = "encoder_start", skip_all, fields(codec = C::NAME))]
    fn start(&self) -> EncoderResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != EncoderState::Configured || inner.surface.is_none() {
            return Err(EncoderError::InvalidState {
                operation: "start",
                state: inner.state,
            });
        }
        let config = inner.config.clone().ok_or(EncoderError::NotStarted)?;

        let mut codec = C::open(&config)?;
        let headers = codec.headers();

        inner.pending_format = Some(OutputFormat {
            mime: config.mime.clone(),
            width: config.width,
            height: config.height,
            codec_data: headers.clone(),
        });
        if !headers.is_empty() {
            inner.ready.push_back(PendingOutput {
                data: headers,
                presentation_time_us: 0,
                flags: BufferFlags {
                    codec_config: true,
                    ..Default::default()
                },
            });
        }

        inner.codec = Some(codec);
        inner.state = EncoderState::Started;
        info!("{} encoder started", C::NAME);
        Ok(())
    }

    fn dequeue_output(&self, timeout: Duration) -> EncoderResult<DequeueOutcome> {
        let surface = {
            let mut inner = self.inner.lock();
            inner.ensure_started()?;

            if let Some(format) = inner.pending_format.take() {
                inner.format = Some(format.clone());
                return Ok(DequeueOutcome::FormatChanged(format));
            }

            if let Some(buffer) = inner.next_ready_buffer() {
                return Ok(DequeueOutcome::Buffer(buffer));
            }

            if inner.pool.is_exhausted() {
                None
            } else {
                inner.surface.clone()
            }
        };

        // Wait without holding the lock so release_output and stop stay responsive.
        let Some(surface) = surface else {
            trace!("Output pool exhausted");
            thread::sleep(timeout);
            return Ok(DequeueOutcome::TryAgainLater);
        };
        let Some(frame) = surface.acquire(timeout) else {
            return Ok(DequeueOutcome::TryAgainLater);
        };

        let mut inner = self.inner.lock();
        inner.ensure_started()?;

        let interval = inner
            .config
            .as_ref()
            .map(EncoderConfig::keyframe_interval_frames)
            .unwrap_or(1);
        let force_keyframe = inner.frames_encoded % interval == 0;
        inner.frames_encoded += 1;

        let codec = inner.codec.as_mut().ok_or(EncoderError::NotStarted)?;
        if let Some(unit) = codec.encode(&frame, force_keyframe)? {
            trace!(
                sequence = frame.sequence,
                size = unit.data.len(),
                keyframe = unit.is_keyframe,
                "Frame encoded"
            );
            inner.ready.push_back(PendingOutput {
                data: unit.data,
                presentation_time_us: frame.timestamp.pts_us,
                flags: BufferFlags {
                    key_frame: unit.is_keyframe,
                    ..Default::default()
                },
            });
        }

        Ok(match inner.next_ready_buffer() {
            Some(buffer) => DequeueOutcome::Buffer(buffer),
            None => DequeueOutcome::TryAgainLater,
        })
    }

    fn release_output(&self, index: usize) -> EncoderResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            EncoderState::Released => Err(EncoderError::Released),
            EncoderState::Started => inner.pool.release(index),
            // Stopping invalidated every dequeued buffer.
            _ => Err(EncoderError::NotStarted),
        }
    }

    fn output_format(&self) -> Option<OutputFormat> {
        self.inner.lock().format.clone()
    }

    #[instrument(name = "encoder_stop", skip_all, fields(codec = C::NAME))]
    fn stop(&self) -> EncoderResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            EncoderState::Started => {
                let in_flight = inner.pool.in_flight();
                if in_flight > 0 {
                    debug!(in_flight, "Stopping with output buffers still dequeued");
                }
                inner.codec = None;
                inner.ready.clear();
                inner.pending_format = None;
                inner.pool.reset();
                inner.state = EncoderState::Stopped;
                info!("{} encoder stopped", C::NAME);
                Ok(())
            }
            EncoderState::Stopped => Ok(()),
            EncoderState::Released => Err(EncoderError::Released),
            state => Err(EncoderError::InvalidState {
                operation: "stop",
                state,
            }),
        }
    }

    fn release(&self) {
        let mut inner = self.inner.lock();
        if inner.state == EncoderState::Released {
            return;
        }
        if let Some(surface) = inner.surface.take() {
            surface.release();
        }
        inner.codec = None;
        inner.ready.clear();
        inner.pending_format = None;
        inner.pool.reset();
        inner.state = EncoderState::Released;
        debug!("{} encoder released", C::NAME);
    }

    fn state(&self) -> EncoderState {
        self.inner.lock().state
    }

    fn name(&self) -> &'static str {
        C::NAME
    }
}

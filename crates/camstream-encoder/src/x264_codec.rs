//! x264 software H.264 encoder.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use crate::adapter::{EncodedUnit, FrameCodec, SurfaceEncoder};
use crate::error::EncoderError;
use crate::frame::SurfaceFrame;
use crate::{
    EncoderConfig, EncoderFactory, EncoderResult, H264Profile, HardwareEncoder, MIME_AVC,
};

/// x264 codec wrapper.
pub struct X264Codec {
    encoder: x264::Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl FrameCodec for X264Codec {
    const NAME: &'static str = "x264";

    #[instrument(name = "x264_open", skip_all)]
    fn open(config: &EncoderConfig) -> EncoderResult<Self> {
        let keyframe_interval = config.keyframe_interval_frames();
        let bitrate_kbps = (config.bitrate_bps / 1000).max(1);

        debug!(
            width = config.width,
            height = config.height,
            fps = config.frame_rate,
            bitrate_kbps,
            keyframe_interval,
            "Initializing x264 encoder"
        );

        // Zero latency: one access unit out per frame in, no lookahead.
        let mut setup = x264::Setup::preset(x264::Preset::Veryfast, x264::Tune::None, false, true)
            .fps(config.frame_rate, 1)
            .bitrate(bitrate_kbps as i32)
            .max_keyframe_interval(keyframe_interval as i32)
            .scenecut_threshold(0);

        setup = match config.profile {
            H264Profile::Baseline => setup.baseline(),
            H264Profile::Main => setup.main(),
            H264Profile::High => setup.high(),
        };

        let encoder = setup
            .build(
                x264::Colorspace::NV12,
                config.width as i32,
                config.height as i32,
            )
            .map_err(|e| EncoderError::Initialization(format!("x264 setup failed: {:?}", e)))?;

        Ok(Self {
            encoder,
            width: config.width,
            height: config.height,
            frame_count: 0,
        })
    }

    fn headers(&mut self) -> Bytes {
        self.encoder
            .headers()
            .map_or_else(|_| Bytes::new(), |h| Bytes::from(h.entirety().to_vec()))
    }

    fn encode(
        &mut self,
        frame: &SurfaceFrame,
        _force_keyframe: bool,
    ) -> EncoderResult<Option<EncodedUnit>> {
        if (frame.width, frame.height) != (self.width, self.height) || !frame.is_valid() {
            return Err(EncoderError::InvalidInput(format!(
                "Expected {}x{} NV12, got {}x{} with {} bytes",
                self.width,
                self.height,
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        // NV12: Y plane followed by interleaved UV plane, both with stride = width
        let y_size = (self.width * self.height) as usize;
        let stride = self.width as i32;
        let image = x264::Image::new(
            x264::Colorspace::NV12,
            self.width as i32,
            self.height as i32,
            &[
                x264::Plane {
                    data: &frame.data[..y_size],
                    stride,
                },
                x264::Plane {
                    data: &frame.data[y_size..],
                    stride,
                },
            ],
        );

        let (data, picture) = self
            .encoder
            .encode(self.frame_count as i64, image)
            .map_err(|e| EncoderError::Encoding(format!("x264 encode failed: {:?}", e)))?;
        self.frame_count += 1;

        if data.len() == 0 {
            trace!(frame = self.frame_count, "x264 buffered frame");
            return Ok(None);
        }

        Ok(Some(EncodedUnit {
            data: Bytes::from(data.entirety().to_vec()),
            is_keyframe: picture.keyframe(),
        }))
    }
}

// SAFETY: x264::Encoder holds raw pointers but has no thread affinity. The
// codec is only reached through the SurfaceEncoder mutex, one thread at a time.
unsafe impl Send for X264Codec {}

/// Surface encoder backed by x264.
pub type X264Encoder = SurfaceEncoder<X264Codec>;

/// Creates [`X264Encoder`]s for H.264.
#[derive(Debug, Clone, Copy, Default)]
pub struct X264EncoderFactory;

impl EncoderFactory for X264EncoderFactory {
    fn create_encoder(&self, mime: &str) -> EncoderResult<Arc<dyn HardwareEncoder>> {
        if mime != MIME_AVC {
            return Err(EncoderError::UnsupportedCodec(mime.to_string()));
        }
        Ok(Arc::new(X264Encoder::new()))
    }
}

//! Synthetic H.264-shaped encoder for virtual hardware.
//!
//! Produces Annex-B access units whose sizes follow the configured bitrate,
//! without doing any real compression. Useful for exercising the pipeline on
//! machines without an encoder.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::adapter::{EncodedUnit, FrameCodec, SurfaceEncoder};
use crate::error::EncoderError;
use crate::frame::SurfaceFrame;
use crate::{EncoderConfig, EncoderFactory, EncoderResult, HardwareEncoder, MIME_AVC};

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const SPS: [u8; 4] = [0x67, 0x42, 0xC0, 0x1F];
const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];
const NAL_IDR_SLICE: u8 = 0x65;
const NAL_SLICE: u8 = 0x41;

/// Keyframes are this many times larger than predicted frames.
const KEYFRAME_WEIGHT: usize = 3;

/// Smallest slice payload emitted.
const MIN_SLICE_BYTES: usize = 16;

/// Codec that fabricates access units sized from the bitrate budget.
pub struct SyntheticCodec {
    bytes_per_frame: usize,
}

impl FrameCodec for SyntheticCodec {
    const NAME: &'static str = "synthetic";

    fn open(config: &EncoderConfig) -> EncoderResult<Self> {
        let bytes_per_frame = (config.bitrate_bps / 8 / config.frame_rate.max(1)) as usize;
        Ok(Self {
            bytes_per_frame: bytes_per_frame.max(MIN_SLICE_BYTES),
        })
    }

    fn headers(&mut self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 * START_CODE.len() + SPS.len() + PPS.len());
        buf.put_slice(&START_CODE);
        buf.put_slice(&SPS);
        buf.put_slice(&START_CODE);
        buf.put_slice(&PPS);
        buf.freeze()
    }

    fn encode(
        &mut self,
        frame: &SurfaceFrame,
        force_keyframe: bool,
    ) -> EncoderResult<Option<EncodedUnit>> {
        if frame.data.is_empty() {
            return Err(EncoderError::InvalidInput("empty frame".to_string()));
        }

        let payload_len = if force_keyframe {
            self.bytes_per_frame * KEYFRAME_WEIGHT
        } else {
            self.bytes_per_frame
        };

        let mut buf = BytesMut::with_capacity(START_CODE.len() + 1 + payload_len);
        buf.put_slice(&START_CODE);
        buf.put_u8(if force_keyframe {
            NAL_IDR_SLICE
        } else {
            NAL_SLICE
        });

        // Sample the picture; setting the low bit keeps start codes out of the payload.
        let stride = (frame.data.len() / payload_len).max(1);
        buf.extend(
            frame
                .data
                .iter()
                .step_by(stride)
                .cycle()
                .take(payload_len)
                .map(|b| b | 0x01),
        );

        Ok(Some(EncodedUnit {
            data: buf.freeze(),
            is_keyframe: force_keyframe,
        }))
    }
}

/// Surface encoder backed by [`SyntheticCodec`].
pub type SyntheticEncoder = SurfaceEncoder<SyntheticCodec>;

/// Creates [`SyntheticEncoder`]s for H.264.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticEncoderFactory;

impl EncoderFactory for SyntheticEncoderFactory {
    fn create_encoder(&self, mime: &str) -> EncoderResult<Arc<dyn HardwareEncoder>> {
        if mime != MIME_AVC {
            return Err(EncoderError::UnsupportedCodec(mime.to_string()));
        }
        Ok(Arc::new(SyntheticEncoder::new()))
    }
}

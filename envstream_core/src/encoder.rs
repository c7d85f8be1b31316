//! Frame Encoder - turns rendered frames into wire Frame Messages.
//!
//! # Wire format
//!
//! One binary transport message per tick, big-endian:
//!
//! ```text
//! offset size field
//! 0      4    magic   "ESFM"
//! 4      1    version (1)
//! 5      1    flags   (bit 0 = done)
//! 6      8    step    u64
//! 14     8    reward  f64 bits
//! 22     4    width   u32
//! 26     4    height  u32
//! 30     4    payload length u32
//! 34     n    payload: PNG, RGB8
//! ```
//!
//! PNG output is a pure function of the pixels, so identical inputs give
//! byte-identical messages.

use envstream_env::TransportMessage;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageFormat, RgbImage};
use thiserror::Error;

use crate::environment::RawFrame;

/// Magic prefix of every frame message.
pub const FRAME_MAGIC: [u8; 4] = *b"ESFM";

/// Current wire format version.
pub const FRAME_VERSION: u8 = 1;

/// Header length in bytes.
pub const HEADER_LEN: usize = 34;

const FLAG_DONE: u8 = 0b0000_0001;

/// Frame encoding/decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("frame has zero dimension ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("pixel buffer is {actual} bytes, expected {expected}")]
    PixelLength { expected: usize, actual: usize },

    #[error("reward is not finite")]
    NonFiniteReward,

    #[error("image codec: {0}")]
    Image(String),

    #[error("malformed frame message: {0}")]
    Malformed(String),
}

/// One tick's worth of output for the client.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub step: u64,
    pub reward: f64,
    pub done: bool,
    pub width: u32,
    pub height: u32,
    /// PNG-encoded frame.
    pub payload: Vec<u8>,
}

impl FrameMessage {
    /// Serializes into the wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&FRAME_MAGIC);
        out.push(FRAME_VERSION);
        out.push(if self.done { FLAG_DONE } else { 0 });
        out.extend_from_slice(&self.step.to_be_bytes());
        out.extend_from_slice(&self.reward.to_bits().to_be_bytes());
        out.extend_from_slice(&self.width.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Consumes the message into a binary transport message.
    pub fn into_transport(self) -> TransportMessage {
        TransportMessage::Binary(self.to_bytes())
    }

    /// Parses the wire layout.
    pub fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        if bytes.len() < HEADER_LEN {
            return Err(EncodingError::Malformed(format!(
                "{} bytes is shorter than the header",
                bytes.len()
            )));
        }
        if bytes[0..4] != FRAME_MAGIC {
            return Err(EncodingError::Malformed("bad magic".into()));
        }
        if bytes[4] != FRAME_VERSION {
            return Err(EncodingError::Malformed(format!(
                "unsupported version {}",
                bytes[4]
            )));
        }

        let flags = bytes[5];
        let step = u64::from_be_bytes(field(bytes, 6));
        let reward = f64::from_bits(u64::from_be_bytes(field(bytes, 14)));
        let width = u32::from_be_bytes(field(bytes, 22));
        let height = u32::from_be_bytes(field(bytes, 26));
        let len = u32::from_be_bytes(field(bytes, 30)) as usize;

        let payload = &bytes[HEADER_LEN..];
        if payload.len() != len {
            return Err(EncodingError::Malformed(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                len
            )));
        }

        Ok(Self {
            step,
            reward,
            done: flags & FLAG_DONE != 0,
            width,
            height,
            payload: payload.to_vec(),
        })
    }

    /// Decodes the PNG payload back into pixels.
    pub fn decode_image(&self) -> Result<RgbImage, EncodingError> {
        let image = image::load_from_memory_with_format(&self.payload, ImageFormat::Png)
            .map_err(|e| EncodingError::Image(e.to_string()))?;
        Ok(image.to_rgb8())
    }
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

/// Stateless PNG frame encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder;

impl FrameEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encodes one frame with its step status.
    ///
    /// Either a complete message is produced or an error; nothing partial
    /// ever reaches the caller.
    pub fn encode(
        &self,
        frame: &RawFrame,
        reward: f64,
        step: u64,
        done: bool,
    ) -> Result<FrameMessage, EncodingError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(EncodingError::EmptyFrame {
                width: frame.width,
                height: frame.height,
            });
        }
        let expected = frame.expected_len();
        if frame.pixels.len() != expected {
            return Err(EncodingError::PixelLength {
                expected,
                actual: frame.pixels.len(),
            });
        }
        if !reward.is_finite() {
            return Err(EncodingError::NonFiniteReward);
        }

        let mut payload = Vec::new();
        PngEncoder::new(&mut payload)
            .write_image(&frame.pixels, frame.width, frame.height, ColorType::Rgb8)
            .map_err(|e| EncodingError::Image(e.to_string()))?;

        Ok(FrameMessage {
            step,
            reward,
            done,
            width: frame.width,
            height: frame.height,
            payload,
        })
    }
}

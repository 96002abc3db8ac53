//! Frame and encoder-argument types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use lapse_common::error::{LapseError, LapseResult};

/// Sequence number of a captured frame, in arrival order. Never reused.
pub type FrameNo = u64;

/// An uncompressed frame as delivered by the capture source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Capture timestamp in microseconds from capture start.
    pub timestamp_us: i64,
    pub data: Bytes,
}

/// Opaque encoded bytes for one captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub frame_no: FrameNo,
    pub key_frame: bool,
    pub payload: Bytes,
}

/// Orientation recorded in the output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Clockwise90 => 90,
            Self::Clockwise180 => 180,
            Self::Clockwise270 => 270,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = LapseError;

    fn try_from(degrees: u16) -> LapseResult<Self> {
        match degrees {
            0 => Ok(Self::None),
            90 => Ok(Self::Clockwise90),
            180 => Ok(Self::Clockwise180),
            270 => Ok(Self::Clockwise270),
            other => Err(LapseError::invalid_argument(format!(
                "rotation must be a multiple of 90 degrees below 360, got {other}"
            ))),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

/// Settings shared by the frame encoder and every processor of one
/// time-lapse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderArgs {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Capture rate; the output plays back at this rate.
    pub fps: u32,
    #[serde(default)]
    pub rotation: Rotation,
}

impl EncoderArgs {
    /// Args from the configured defaults at the given rate.
    pub fn from_defaults(defaults: &lapse_common::config::EncoderDefaults, fps: u32) -> Self {
        Self {
            codec: defaults.codec.clone(),
            width: defaults.width,
            height: defaults.height,
            bitrate: defaults.bitrate,
            fps,
            rotation: Rotation::None,
        }
    }
}

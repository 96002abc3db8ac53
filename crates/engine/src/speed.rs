//! Decimation factor.

use std::fmt;
use std::num::NonZeroU32;

use lapse_common::error::{LapseError, LapseResult};
use lapse_media::FrameNo;

/// Keep one frame out of every `speed` captured frames.
///
/// Frame `f` belongs to a saver of speed `s` iff `f % s == 0`, so frame 0
/// belongs to every speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Speed(NonZeroU32);

impl Speed {
    pub const ONE: Speed = Speed(NonZeroU32::MIN);

    pub fn new(value: u32) -> LapseResult<Self> {
        NonZeroU32::new(value)
            .map(Self)
            .ok_or_else(|| LapseError::invalid_argument("speed must be at least 1"))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    pub fn includes(self, frame_no: FrameNo) -> bool {
        frame_no % self.0.get() as u64 == 0
    }

    /// The standby speed for a saver running at `self`.
    pub fn doubled(self) -> LapseResult<Self> {
        self.0
            .get()
            .checked_mul(2)
            .and_then(NonZeroU32::new)
            .map(Self)
            .ok_or_else(|| LapseError::invalid_argument(format!("speed {self} cannot double")))
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

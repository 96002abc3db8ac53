//! Clock and frame-timing utilities.
//!
//! Captured frames are identified by their sequence number. This module
//! converts between frame numbers, timestamps and output durations, and
//! provides the wall clock used to stamp artifacts.

use std::time::{Duration, Instant};

/// Maps frame numbers to media time at a fixed frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    fps: u32,
}

impl FrameClock {
    /// Create a clock for the given rate. A zero rate is clamped to 1.
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Time between two consecutive frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps as u64)
    }

    /// Presentation timestamp of a frame, in microseconds from capture start.
    pub fn timestamp_us(&self, frame_no: u64) -> i64 {
        (frame_no as i128 * 1_000_000 / self.fps as i128) as i64
    }

    /// Playback length of `frame_count` frames at this rate.
    pub fn duration_secs(&self, frame_count: u64) -> f64 {
        frame_count as f64 / self.fps as f64
    }
}

/// A recording clock anchored at capture start.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: wall_clock_rfc3339(),
        }
    }

    /// Get nanoseconds elapsed since recording start.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at recording start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Current wall-clock time as an RFC 3339 string.
pub fn wall_clock_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Paces a producer at a target rate.
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ns: 1_000_000_000 / target_hz.max(1) as u64,
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                self.last_tick_ns = Some(last + self.target_interval_ns);
                true
            }
            _ => false,
        }
    }

    /// Nanoseconds until the next tick is due, given the current time.
    pub fn until_next_ns(&self, current_ns: u64) -> u64 {
        match self.last_tick_ns {
            None => 0,
            Some(last) => (last + self.target_interval_ns).saturating_sub(current_ns),
        }
    }
}

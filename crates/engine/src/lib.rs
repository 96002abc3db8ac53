//! Lapse Time-Lapse Engine
//!
//! Turns an unbounded stream of captured frames into one video whose
//! length never exceeds a fixed ceiling, by raising the "keep every Nth
//! frame" factor over time without re-encoding anything already written.
//!
//! # Architecture
//!
//! ```text
//!  write(frame) ──▶ EncoderAdapter ──▶ FrameEncoder (backend)
//!                                          │ EncoderEvent
//!                                          ▼
//!  ┌──────────────── tick (every 100 ms) ───────────────────┐
//!  │  EncodedFrames ──▶ FrameStore ──┬──▶ current SpeedSaver │──▶ artifact
//!  │                                 └──▶ standby SpeedSaver │   (2× speed)
//!  └────────────────────── SpeedManager ───────────────────────┘
//! ```
//!
//! The tick is the only code that touches savers or evicts cached frames.
//! Callers only submit frames and post requests.

pub mod encoder_adapter;
pub mod frame_store;
pub mod saver;
pub mod speed;
pub mod speed_manager;
pub mod speed_saver;

pub use encoder_adapter::{EncodedFrames, EncoderAdapter};
pub use frame_store::FrameStore;
pub use saver::{ErrorHandler, TimeLapseSaver};
pub use speed::Speed;
pub use speed_manager::{Phase, Request, SaverStats, SpeedManager, TickOutcome};
pub use speed_saver::SpeedSaver;

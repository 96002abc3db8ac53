//! Lapse Media
//!
//! Interfaces to the collaborators a time-lapse drives, and a file-backed
//! implementation of each:
//!
//! - **FrameEncoder:** turns raw frames into encoded payloads, reporting
//!   output asynchronously through an [`EncoderSink`]
//! - **FrameProcessor:** muxes encoded frames into one artifact
//! - **TempStorage:** allocates and removes in-flight artifacts
//! - **MediaBackend:** validates encoder settings and builds the above

pub mod backend;
pub mod container;
pub mod frame;
pub mod passthrough;

pub use backend::*;
pub use frame::*;

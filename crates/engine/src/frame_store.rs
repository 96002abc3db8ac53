//! Cache of encoded frames awaiting consumption by the live savers.

use std::collections::{BTreeMap, BTreeSet};

use lapse_media::{EncodedFrame, FrameNo};

/// Encoded frames keyed by frame number.
///
/// Grows when encoder output is drained and shrinks when a speed
/// transition retires frames no live saver can ask for again. Both happen
/// on the tick, which owns the store.
///
/// Frames the encoder failed on are kept as gaps, so a saver waiting for
/// one can move past it instead of waiting forever.
#[derive(Debug, Default)]
pub struct FrameStore {
    frames: BTreeMap<FrameNo, EncodedFrame>,
    failed: BTreeSet<FrameNo>,
    payload_bytes: usize,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache a frame. A frame number already present is replaced.
    pub fn insert(&mut self, frame: EncodedFrame) {
        self.payload_bytes += frame.payload.len();
        if let Some(old) = self.frames.insert(frame.frame_no, frame) {
            self.payload_bytes -= old.payload.len();
        }
    }

    pub fn get(&self, frame_no: FrameNo) -> Option<&EncodedFrame> {
        self.frames.get(&frame_no)
    }

    pub fn contains(&self, frame_no: FrameNo) -> bool {
        self.frames.contains_key(&frame_no)
    }

    /// Record that `frame_no` will never be delivered.
    pub fn mark_failed(&mut self, frame_no: FrameNo) {
        self.failed.insert(frame_no);
    }

    pub fn is_failed(&self, frame_no: FrameNo) -> bool {
        self.failed.contains(&frame_no)
    }

    /// Keep only frames and gaps for which `live` returns true. Returns how
    /// many cached frames were evicted.
    pub fn retain(&mut self, mut live: impl FnMut(FrameNo) -> bool) -> usize {
        self.failed.retain(|frame_no| live(*frame_no));
        let before = self.frames.len();
        let mut freed = 0;
        self.frames.retain(|frame_no, frame| {
            let keep = live(*frame_no);
            if !keep {
                freed += frame.payload.len();
            }
            keep
        });
        self.payload_bytes -= freed;
        before - self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.failed.clear();
        self.payload_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total payload size held.
    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    /// Cached frame numbers in ascending order.
    pub fn frame_numbers(&self) -> impl Iterator<Item = FrameNo> + '_ {
        self.frames.keys().copied()
    }
}

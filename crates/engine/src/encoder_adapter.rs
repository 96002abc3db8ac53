//! Bridges the raw-frame encoder to the frame store.
//!
//! The adapter is split in two halves. [`EncoderAdapter`] lives with the
//! caller and submits frames; [`EncodedFrames`] lives with the tick and
//! turns encoder output into cached [`EncodedFrame`]s. Encoder output
//! carries no frame number, so both halves share the FIFO of submitted
//! frame numbers and pair each output with the oldest pending entry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use lapse_common::error::{LapseError, LapseResult};
use lapse_media::{
    EncodedFrame, EncoderArgs, EncoderEvent, EncoderSink, FrameEncoder, FrameNo, MediaBackend,
    RawFrame,
};

use crate::frame_store::FrameStore;
use crate::speed::Speed;

/// Capacity of the encoder output channel.
pub const ENCODER_QUEUE_CAPACITY: usize = 256;

type PendingFrames = Arc<Mutex<VecDeque<FrameNo>>>;

/// Submitting half of the adapter.
pub struct EncoderAdapter {
    encoder: Box<dyn FrameEncoder>,
    pending: PendingFrames,
    key_frame_interval: u64,
    last_submitted: Option<FrameNo>,
    submitted: Arc<AtomicU64>,
    closed: bool,
}

impl std::fmt::Debug for EncoderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderAdapter")
            .field("key_frame_interval", &self.key_frame_interval)
            .field("last_submitted", &self.last_submitted)
            .field("submitted", &self.submitted)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Draining half of the adapter, owned by the tick.
pub struct EncodedFrames {
    events: mpsc::Receiver<EncoderEvent>,
    pending: PendingFrames,
    submitted: Arc<AtomicU64>,
    highest_encoded: Option<FrameNo>,
}

impl EncoderAdapter {
    /// Create the backend encoder and both adapter halves.
    ///
    /// Frames whose number is a multiple of `2 * initial_speed` are
    /// submitted as key frames, so the frames that survive the first
    /// speed transition always start a decodable group.
    pub fn new(
        backend: &dyn MediaBackend,
        args: &EncoderArgs,
        initial_speed: Speed,
    ) -> LapseResult<(Self, EncodedFrames)> {
        let (sink, events) = EncoderSink::channel(ENCODER_QUEUE_CAPACITY);
        let encoder = backend.create_encoder(args, sink)?;
        let pending = PendingFrames::default();
        let submitted = Arc::new(AtomicU64::new(0));

        let adapter = Self {
            encoder,
            pending: pending.clone(),
            key_frame_interval: 2 * initial_speed.get() as u64,
            last_submitted: None,
            submitted: submitted.clone(),
            closed: false,
        };
        let frames = EncodedFrames {
            events,
            pending,
            submitted,
            highest_encoded: None,
        };
        Ok((adapter, frames))
    }

    pub fn is_key_frame(&self, frame_no: FrameNo) -> bool {
        frame_no % self.key_frame_interval == 0
    }

    /// Hand a frame to the encoder.
    ///
    /// Returns `Ok(false)` without touching the encoder once the adapter is
    /// closed. Frame numbers must strictly increase.
    pub fn submit(&mut self, frame: RawFrame, frame_no: FrameNo) -> LapseResult<bool> {
        if self.closed {
            tracing::trace!(frame_no, "Adapter closed; frame ignored");
            return Ok(false);
        }
        if let Some(last) = self.last_submitted {
            if frame_no <= last {
                return Err(LapseError::invalid_argument(format!(
                    "frame {frame_no} submitted after frame {last}"
                )));
            }
        }

        let key_frame = self.is_key_frame(frame_no);
        {
            // Queue the number before encoding so output can never
            // overtake it.
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.push_back(frame_no);
            if let Err(e) = self.encoder.encode(frame, key_frame) {
                pending.pop_back();
                return Err(e);
            }
        }

        self.last_submitted = Some(frame_no);
        self.submitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(frame_no, key_frame, "Frame submitted");
        Ok(true)
    }

    /// Stop accepting frames and wait until every submitted frame has
    /// produced output. Closing twice is a no-op.
    pub async fn close(&mut self) -> LapseResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let flushed = self.encoder.flush().await;
        self.encoder.close();
        flushed
    }

    /// Stop accepting frames without waiting for pending output.
    pub fn abort(&mut self) {
        if !self.closed {
            self.closed = true;
            self.encoder.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn last_submitted(&self) -> Option<FrameNo> {
        self.last_submitted
    }

    /// Frames accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl EncodedFrames {
    /// Move every output the encoder has reported so far into `store`.
    ///
    /// Frames for which `wanted` returns false are counted as encoded but
    /// not cached. A wanted frame that failed to encode is recorded as a
    /// gap in `store`. All ready events are consumed even if some are
    /// errors; the first error is returned afterwards.
    pub fn drain_into(
        &mut self,
        store: &mut FrameStore,
        mut wanted: impl FnMut(FrameNo) -> bool,
    ) -> LapseResult<usize> {
        let mut cached = 0;
        let mut first_error = None;

        while let Ok(event) = self.events.try_recv() {
            let Some(frame_no) = self.pop_pending() else {
                first_error.get_or_insert_with(|| {
                    LapseError::encoder("encoder produced output for an unknown frame")
                });
                continue;
            };
            self.highest_encoded = Some(frame_no);

            match event {
                EncoderEvent::Output { payload, key_frame } => {
                    if wanted(frame_no) {
                        store.insert(EncodedFrame {
                            frame_no,
                            key_frame,
                            payload,
                        });
                        cached += 1;
                    }
                }
                EncoderEvent::Error(message) => {
                    tracing::warn!(frame_no, %message, "Frame failed to encode");
                    if wanted(frame_no) {
                        store.mark_failed(frame_no);
                    }
                    first_error.get_or_insert_with(|| {
                        LapseError::encoder(format!("frame {frame_no}: {message}"))
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(cached),
        }
    }

    /// Highest frame number the encoder has reported on.
    pub fn highest_encoded(&self) -> Option<FrameNo> {
        self.highest_encoded
    }

    /// Frames the submitting half has accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    fn pop_pending(&self) -> Option<FrameNo> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

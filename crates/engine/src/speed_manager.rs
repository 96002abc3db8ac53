//! Dual-saver state machine driven by the reconciliation tick.
//!
//! Two savers are live while recording: `current` produces the eventual
//! output and `standby` runs at twice its speed. Once `current` has
//! written the checkpoint frame its output would exceed the duration
//! ceiling, so `standby` takes over and a new standby starts at double
//! speed from frame 0. Already written output is never re-encoded.

use std::sync::Arc;

use lapse_common::config::TimeLapseConfig;
use lapse_common::error::{LapseError, LapseResult};
use lapse_media::{Artifact, EncoderArgs, FrameNo, MediaBackend, TempStorage};

use crate::encoder_adapter::EncodedFrames;
use crate::frame_store::FrameStore;
use crate::speed::Speed;
use crate::speed_saver::SpeedSaver;

/// What the caller has asked for. Observed only at tick boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Request {
    #[default]
    Record,
    End,
    Cancel,
}

/// Lifecycle of the manager.
#[derive(Debug)]
pub enum Phase {
    Recording {
        current: SpeedSaver,
        standby: SpeedSaver,
    },
    Ended,
    Canceled,
}

/// Result of one tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// Keep ticking.
    Continue,
    /// Terminal: the stream ended and `artifact` holds the output.
    ///
    /// `encoder_error` is set when the final drain reported a failed frame.
    /// The output skips that frame, and the caller decides whether to keep
    /// it or [`discard`](SpeedManager::discard) it.
    Finished {
        artifact: Artifact,
        encoder_error: Option<LapseError>,
    },
    /// Terminal: both savers were discarded.
    Canceled,
}

/// Snapshot of the manager's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaverStats {
    /// Speed baked into the output if the stream ended now.
    pub current_speed: u32,
    pub checkpoint: FrameNo,
    pub frames_submitted: u64,
    pub highest_encoded: Option<FrameNo>,
    /// Frames written by the current saver.
    pub frames_written: u64,
    pub cached_frames: usize,
    /// Payload bytes held by the frame cache.
    pub cached_bytes: usize,
}

pub struct SpeedManager {
    phase: Phase,
    store: FrameStore,
    frames: EncodedFrames,
    checkpoint: FrameNo,
    config: TimeLapseConfig,
    args: EncoderArgs,
    backend: Arc<dyn MediaBackend>,
    storage: Arc<dyn TempStorage>,
}

impl SpeedManager {
    /// Create both savers for `config.initial_speed`.
    pub async fn new(
        backend: Arc<dyn MediaBackend>,
        storage: Arc<dyn TempStorage>,
        args: EncoderArgs,
        config: TimeLapseConfig,
        frames: EncodedFrames,
    ) -> LapseResult<Self> {
        let initial = Speed::new(config.initial_speed)?;
        let current = SpeedSaver::create(initial, &args, backend.as_ref(), storage.clone()).await?;
        let standby = match initial.doubled() {
            Ok(speed) => SpeedSaver::create(speed, &args, backend.as_ref(), storage.clone()).await,
            Err(e) => Err(e),
        };
        let standby = match standby {
            Ok(standby) => standby,
            Err(e) => {
                if let Err(cleanup) = current.cancel().await {
                    tracing::warn!(error = %cleanup, "Failed to clean up initial saver");
                }
                return Err(e);
            }
        };

        let checkpoint = config.checkpoint_for(initial.get());
        tracing::info!(
            speed = %initial,
            checkpoint,
            max_duration_secs = config.max_duration_secs,
            fps = config.fps,
            "Time-lapse recording started"
        );

        Ok(Self {
            phase: Phase::Recording { current, standby },
            store: FrameStore::new(),
            frames,
            checkpoint,
            config,
            args,
            backend,
            storage,
        })
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_terminated(&self) -> bool {
        !matches!(self.phase, Phase::Recording { .. })
    }

    pub fn current(&self) -> Option<&SpeedSaver> {
        match &self.phase {
            Phase::Recording { current, .. } => Some(current),
            _ => None,
        }
    }

    pub fn standby(&self) -> Option<&SpeedSaver> {
        match &self.phase {
            Phase::Recording { standby, .. } => Some(standby),
            _ => None,
        }
    }

    pub fn current_speed(&self) -> Option<Speed> {
        self.current().map(SpeedSaver::speed)
    }

    /// Frame number at which the standby saver takes over.
    pub fn checkpoint(&self) -> FrameNo {
        self.checkpoint
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn highest_encoded(&self) -> Option<FrameNo> {
        self.frames.highest_encoded()
    }

    pub fn stats(&self) -> SaverStats {
        SaverStats {
            current_speed: self.current_speed().map_or(0, Speed::get),
            checkpoint: self.checkpoint,
            frames_submitted: self.frames.submitted(),
            highest_encoded: self.frames.highest_encoded(),
            frames_written: self.current().map_or(0, SpeedSaver::frames_written),
            cached_frames: self.store.len(),
            cached_bytes: self.store.payload_bytes(),
        }
    }

    /// Run one reconciliation step for `request`.
    ///
    /// `End` and `Cancel` are terminal whether or not they succeed; after
    /// them the manager rejects further ticks.
    pub async fn tick(&mut self, request: Request) -> LapseResult<TickOutcome> {
        if self.is_terminated() {
            return Err(LapseError::invalid_argument(
                "time-lapse has already terminated",
            ));
        }
        match request {
            Request::Cancel => {
                self.abandon().await;
                Ok(TickOutcome::Canceled)
            }
            Request::End => {
                let (artifact, encoder_error) = self.finish().await?;
                Ok(TickOutcome::Finished {
                    artifact,
                    encoder_error,
                })
            }
            Request::Record => {
                self.step().await?;
                Ok(TickOutcome::Continue)
            }
        }
    }

    /// Cancel both savers, removing their artifacts. Cleanup failures are
    /// logged; this always terminates.
    pub async fn abandon(&mut self) {
        let Phase::Recording { current, standby } =
            std::mem::replace(&mut self.phase, Phase::Canceled)
        else {
            return;
        };

        let (current_speed, standby_speed) = (current.speed(), standby.speed());
        let (a, b) = tokio::join!(current.cancel(), standby.cancel());
        for (speed, result) in [(current_speed, a), (standby_speed, b)] {
            if let Err(e) = result {
                tracing::warn!(%speed, error = %e, "Failed to clean up canceled saver");
            }
        }
        self.store.clear();
        tracing::info!("Time-lapse savers discarded");
    }

    /// Remove a finished artifact the caller does not want.
    pub async fn discard(&mut self, artifact: &Artifact) -> LapseResult<()> {
        self.storage.remove(artifact).await
    }

    async fn finish(&mut self) -> LapseResult<(Artifact, Option<LapseError>)> {
        let Phase::Recording {
            mut current,
            standby,
        } = std::mem::replace(&mut self.phase, Phase::Ended)
        else {
            return Err(LapseError::invalid_argument("time-lapse has already terminated"));
        };

        if let Err(e) = standby.cancel().await {
            tracing::warn!(error = %e, "Failed to clean up standby saver");
        }

        // The encoder was flushed before the end was requested, so this
        // drain sees every remaining frame.
        let speed = current.speed();
        let encoder_error = self
            .frames
            .drain_into(&mut self.store, |frame_no| speed.includes(frame_no))
            .err();

        let highest = self.frames.highest_encoded();
        let written = write_remaining(&self.store, highest, &mut current).await;
        self.store.clear();
        let finished = match written {
            Ok(()) => current.end_write().await,
            Err(e) => {
                if let Err(cleanup) = current.cancel().await {
                    tracing::warn!(error = %cleanup, "Failed to clean up current saver");
                }
                Err(e)
            }
        };
        match finished {
            Ok(artifact) => Ok((artifact, encoder_error)),
            Err(e) => {
                if let Some(displaced) = encoder_error {
                    tracing::error!(error = %displaced, "Encoder error displaced by finish failure");
                }
                Err(e)
            }
        }
    }

    /// Drain the encoder, write one frame per saver and transition once
    /// the checkpoint is reached.
    ///
    /// An encoder error is returned ahead of any write or transition error
    /// from the same tick: its frame has left the pending queue, while the
    /// other failures are retried on the next tick.
    async fn step(&mut self) -> LapseResult<()> {
        let (current_speed, standby_speed) = match &self.phase {
            Phase::Recording { current, standby } => (current.speed(), standby.speed()),
            _ => return Ok(()),
        };
        let drained = self.frames.drain_into(&mut self.store, |frame_no| {
            current_speed.includes(frame_no) || standby_speed.includes(frame_no)
        });

        let advanced = self.advance().await;
        match (drained, advanced) {
            (Err(e), Err(displaced)) => {
                tracing::error!(
                    error = %displaced,
                    "Tick error displaced by encoder error; retrying next tick"
                );
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Ok(_), Ok(())) => Ok(()),
        }
    }

    async fn advance(&mut self) -> LapseResult<()> {
        let Phase::Recording { current, standby } = &mut self.phase else {
            return Ok(());
        };

        pull_and_write(&self.store, current).await?;
        pull_and_write(&self.store, standby).await?;

        if current.max_written().is_some_and(|max| max >= self.checkpoint) {
            self.transition().await?;
        }
        Ok(())
    }

    /// Promote the standby saver and start a new one at double its speed.
    ///
    /// The new standby is created first; if that fails nothing changes and
    /// the current saver keeps running.
    async fn transition(&mut self) -> LapseResult<()> {
        let Phase::Recording { current, standby } = &mut self.phase else {
            return Ok(());
        };

        let promoted_speed = standby.speed();
        let fresh = SpeedSaver::create(
            promoted_speed.doubled()?,
            &self.args,
            self.backend.as_ref(),
            self.storage.clone(),
        )
        .await?;

        let retired = std::mem::replace(current, std::mem::replace(standby, fresh));
        self.checkpoint = self.config.checkpoint_for(promoted_speed.get());

        let (current_speed, standby_speed) = (current.speed(), standby.speed());
        let evicted = self
            .store
            .retain(|frame_no| current_speed.includes(frame_no) || standby_speed.includes(frame_no));

        tracing::info!(
            from = %retired.speed(),
            to = %current_speed,
            at_frame = retired.max_written(),
            checkpoint = self.checkpoint,
            evicted,
            cached = self.store.len(),
            "Speed transition"
        );

        if let Err(e) = retired.cancel().await {
            tracing::warn!(error = %e, "Failed to clean up retired saver");
        }
        Ok(())
    }
}

/// Write the frame `saver` is waiting for, if it has been encoded. Frames
/// that failed to encode are skipped first.
async fn pull_and_write(store: &FrameStore, saver: &mut SpeedSaver) -> LapseResult<bool> {
    while store.is_failed(saver.next_frame()) {
        saver.skip(saver.next_frame())?;
    }
    match store.get(saver.next_frame()) {
        Some(frame) => {
            saver.write(frame).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Write every frame `current` still needs up to `highest`, skipping
/// frames that failed to encode. Stops early at the first frame the
/// encoder never reported on.
async fn write_remaining(
    store: &FrameStore,
    highest: Option<FrameNo>,
    current: &mut SpeedSaver,
) -> LapseResult<()> {
    let Some(highest) = highest else {
        return Ok(());
    };
    while current.next_frame() <= highest {
        let frame_no = current.next_frame();
        if store.is_failed(frame_no) {
            current.skip(frame_no)?;
            continue;
        }
        let Some(frame) = store.get(frame_no) else {
            tracing::warn!(
                frame_no,
                highest,
                "Frame missing at end of stream; output truncated"
            );
            break;
        };
        current.write(frame).await?;
    }
    Ok(())
}

impl std::fmt::Debug for SpeedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedManager")
            .field("phase", &self.phase)
            .field("checkpoint", &self.checkpoint)
            .field("cached_frames", &self.store.len())
            .finish()
    }
}

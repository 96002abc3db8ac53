//! One encode-and-mux pipeline bound to a single speed.

use std::sync::Arc;

use lapse_common::error::{LapseError, LapseResult};
use lapse_media::{
    Artifact, EncodedFrame, EncoderArgs, FrameNo, FrameProcessor, MediaBackend, TempStorage,
};

use crate::speed::Speed;

/// Writes every `speed`-th frame into its own temporary artifact.
///
/// A saver either becomes the final output through [`SpeedSaver::end_write`]
/// or is discarded through [`SpeedSaver::cancel`]; both consume it.
pub struct SpeedSaver {
    speed: Speed,
    artifact: Artifact,
    processor: Box<dyn FrameProcessor>,
    storage: Arc<dyn TempStorage>,
    max_written: Option<FrameNo>,
    frames_written: u64,
}

impl SpeedSaver {
    /// Allocate a temp artifact and a processor writing into it.
    ///
    /// If the processor cannot be created the artifact is removed again,
    /// so a failed create leaves nothing behind.
    pub async fn create(
        speed: Speed,
        args: &EncoderArgs,
        backend: &dyn MediaBackend,
        storage: Arc<dyn TempStorage>,
    ) -> LapseResult<Self> {
        let artifact = storage.create(&format!("x{}", speed.get())).await?;

        let processor = match backend.create_processor(&artifact, speed.get(), args).await {
            Ok(processor) => processor,
            Err(e) => {
                if let Err(cleanup) = storage.remove(&artifact).await {
                    tracing::warn!(
                        %speed,
                        error = %cleanup,
                        "Failed to remove artifact of unfinished saver"
                    );
                }
                return Err(e);
            }
        };

        tracing::debug!(%speed, path = %artifact.path().display(), "Speed saver created");
        Ok(Self {
            speed,
            artifact,
            processor,
            storage,
            max_written: None,
            frames_written: 0,
        })
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn includes(&self, frame_no: FrameNo) -> bool {
        self.speed.includes(frame_no)
    }

    /// Highest frame number this saver has moved past, whether written or
    /// skipped as a gap.
    pub fn max_written(&self) -> Option<FrameNo> {
        self.max_written
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// The frame this saver is waiting for.
    pub fn next_frame(&self) -> FrameNo {
        match self.max_written {
            Some(max) => max + self.speed.get() as u64,
            None => 0,
        }
    }

    /// Forward a frame to the processor.
    ///
    /// The frame must belong to this speed and come after every frame
    /// written so far. On a processor error the saver does not advance,
    /// so the same frame is requested again.
    pub async fn write(&mut self, frame: &EncodedFrame) -> LapseResult<()> {
        self.check_next(frame.frame_no)?;
        self.processor.write(frame).await?;
        self.max_written = Some(frame.frame_no);
        self.frames_written += 1;
        tracing::trace!(speed = %self.speed, frame_no = frame.frame_no, "Frame written");
        Ok(())
    }

    /// Move past a frame that will never arrive, leaving a gap in the
    /// output.
    pub fn skip(&mut self, frame_no: FrameNo) -> LapseResult<()> {
        self.check_next(frame_no)?;
        self.max_written = Some(frame_no);
        tracing::debug!(speed = %self.speed, frame_no, "Frame skipped");
        Ok(())
    }

    fn check_next(&self, frame_no: FrameNo) -> LapseResult<()> {
        if !self.includes(frame_no) {
            return Err(LapseError::invalid_argument(format!(
                "frame {frame_no} does not belong to speed {}",
                self.speed
            )));
        }
        if self.max_written.is_some_and(|max| frame_no <= max) {
            return Err(LapseError::invalid_argument(format!(
                "frame {frame_no} already passed at speed {}",
                self.speed
            )));
        }
        Ok(())
    }

    /// Abort the processor and delete the artifact.
    ///
    /// Both steps are attempted; the first failure is returned.
    pub async fn cancel(mut self) -> LapseResult<()> {
        let aborted = self.processor.abort().await;
        let removed = self.storage.remove(&self.artifact).await;
        tracing::debug!(speed = %self.speed, frames = self.frames_written, "Speed saver canceled");
        aborted.and(removed)
    }

    /// Finalize the artifact and hand it over as the result.
    ///
    /// If finalizing fails the artifact is deleted.
    pub async fn end_write(mut self) -> LapseResult<Artifact> {
        if let Err(e) = self.processor.finish().await {
            if let Err(cleanup) = self.storage.remove(&self.artifact).await {
                tracing::warn!(error = %cleanup, "Failed to remove unfinished artifact");
            }
            return Err(e);
        }
        tracing::info!(
            speed = %self.speed,
            frames = self.frames_written,
            path = %self.artifact.path().display(),
            "Time-lapse artifact finalized"
        );
        Ok(self.artifact)
    }
}

impl std::fmt::Debug for SpeedSaver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedSaver")
            .field("speed", &self.speed)
            .field("artifact", &self.artifact)
            .field("max_written", &self.max_written)
            .field("frames_written", &self.frames_written)
            .finish()
    }
}

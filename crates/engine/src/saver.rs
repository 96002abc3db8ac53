//! Caller-facing time-lapse handle and the tick loop behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use lapse_common::config::TimeLapseConfig;
use lapse_common::error::{LapseError, LapseResult};
use lapse_media::{Artifact, EncoderArgs, FrameNo, MediaBackend, RawFrame, TempStorage};

use crate::encoder_adapter::EncoderAdapter;
use crate::speed::Speed;
use crate::speed_manager::{Request, SaverStats, SpeedManager, TickOutcome};

/// Receives errors raised inside a tick.
pub type ErrorHandler = Arc<dyn Fn(LapseError) + Send + Sync>;

type SharedHandler = Arc<Mutex<Option<ErrorHandler>>>;

/// How the tick loop terminated.
#[derive(Debug)]
enum Completion {
    Finished(Artifact),
    Canceled,
}

/// An adaptive time-lapse recording.
///
/// Frames go in through [`write`](Self::write); a background tick decimates
/// them into a single output whose length stays under
/// `max_duration_secs`. Dropping the handle without ending it cancels the
/// recording.
pub struct TimeLapseSaver {
    adapter: EncoderAdapter,
    requests: watch::Sender<Request>,
    stats: watch::Receiver<SaverStats>,
    handler: SharedHandler,
    faulted: Arc<AtomicBool>,
    canceled: bool,
    task: Option<JoinHandle<LapseResult<Completion>>>,
}

impl TimeLapseSaver {
    /// Start a time-lapse.
    ///
    /// The encoder configuration is checked before anything is allocated.
    /// `config.fps` overrides `args.fps`, since checkpoints and playback
    /// must agree on the rate. Must be called inside a tokio runtime.
    pub async fn create(
        backend: Arc<dyn MediaBackend>,
        storage: Arc<dyn TempStorage>,
        mut args: EncoderArgs,
        config: TimeLapseConfig,
    ) -> LapseResult<Self> {
        config.validate()?;
        let initial_speed = Speed::new(config.initial_speed)?;

        if args.fps != config.fps {
            tracing::debug!(args_fps = args.fps, fps = config.fps, "Using configured fps");
            args.fps = config.fps;
        }
        if !backend.is_config_supported(&args).await? {
            return Err(LapseError::unsupported_config(format!(
                "{} backend rejected {} {}x{} @ {}fps",
                backend.name(),
                args.codec,
                args.width,
                args.height,
                args.fps
            )));
        }

        let frames_per_tick =
            config.fps as f64 * config.tick_interval_ms as f64 / 1000.0 / initial_speed.get() as f64;
        if frames_per_tick > 1.0 {
            tracing::warn!(
                frames_per_tick,
                "Capture outpaces the tick at this speed; frames will queue until it speeds up"
            );
        }

        let (mut adapter, frames) = EncoderAdapter::new(backend.as_ref(), &args, initial_speed)?;
        let interval = config.tick_interval();
        let manager = match SpeedManager::new(backend, storage, args, config, frames).await {
            Ok(manager) => manager,
            Err(e) => {
                adapter.abort();
                return Err(e);
            }
        };

        let (requests, request_rx) = watch::channel(Request::Record);
        let (stats_tx, stats) = watch::channel(manager.stats());
        let handler = SharedHandler::default();
        let faulted = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_ticks(
            manager,
            request_rx,
            interval,
            handler.clone(),
            stats_tx,
            faulted.clone(),
        ));

        Ok(Self {
            adapter,
            requests,
            stats,
            handler,
            faulted,
            canceled: false,
            task: Some(task),
        })
    }

    /// Accept one raw frame.
    ///
    /// Never waits for encoding. After `end_write` or `cancel` this is a
    /// no-op. Fails with [`LapseError::Faulted`] once an unhandled tick error
    /// stopped the pipeline.
    pub fn write(&mut self, frame: RawFrame, frame_no: FrameNo) -> LapseResult<()> {
        if self.faulted.load(Ordering::Acquire) {
            return Err(LapseError::faulted(
                "an earlier tick error stopped the time-lapse",
            ));
        }
        if self.task.is_none() {
            tracing::trace!(frame_no, "Time-lapse closed; frame ignored");
            return Ok(());
        }
        self.adapter.submit(frame, frame_no)?;
        Ok(())
    }

    /// Route tick errors to `handler` instead of stopping the pipeline.
    ///
    /// The handler decides whether to keep going; call [`cancel`](Self::cancel)
    /// to stop.
    pub fn set_error_callback(&mut self, handler: impl Fn(LapseError) + Send + Sync + 'static) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Finish the recording and return the output artifact.
    ///
    /// Resolves once every submitted frame has been encoded and the final
    /// saver has been finalized.
    pub async fn end_write(&mut self) -> LapseResult<Artifact> {
        let Some(task) = self.task.take() else {
            if self.canceled {
                return Err(LapseError::Canceled);
            }
            return Err(LapseError::invalid_argument("time-lapse has already ended"));
        };

        if let Err(e) = self.adapter.close().await {
            tracing::warn!(error = %e, "Encoder flush failed; output may miss trailing frames");
        }
        self.requests.send_if_modified(|request| {
            if *request == Request::Record {
                *request = Request::End;
                true
            } else {
                false
            }
        });

        match join(task).await? {
            Completion::Finished(artifact) => Ok(artifact),
            Completion::Canceled => Err(LapseError::Canceled),
        }
    }

    /// Discard the recording, removing both temporary artifacts.
    ///
    /// A no-op after `end_write` or an earlier `cancel`. Returns the original
    /// error if the pipeline had already stopped on an unhandled one.
    pub async fn cancel(&mut self) -> LapseResult<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        self.canceled = true;
        self.adapter.abort();
        self.requests.send_replace(Request::Cancel);
        join(task).await.map(|_| ())
    }

    /// Speed baked into the output if the recording ended now.
    pub fn current_speed(&self) -> u32 {
        self.stats.borrow().current_speed
    }

    /// Progress as of the last tick, with a live submission count.
    pub fn stats(&self) -> SaverStats {
        SaverStats {
            frames_submitted: self.adapter.submitted(),
            ..*self.stats.borrow()
        }
    }

    /// Whether an unhandled tick error stopped the pipeline.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }
}

impl Drop for TimeLapseSaver {
    fn drop(&mut self) {
        if self.task.is_some() {
            tracing::debug!("Time-lapse dropped while recording; canceling");
            self.adapter.abort();
            self.requests.send_replace(Request::Cancel);
        }
    }
}

fn registered(handler: &SharedHandler) -> Option<ErrorHandler> {
    handler.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

async fn join(task: JoinHandle<LapseResult<Completion>>) -> LapseResult<Completion> {
    task.await
        .map_err(|e| LapseError::faulted(format!("tick task failed: {e}")))?
}

/// Tick until a terminal request completes or an unhandled error stops the
/// loop. The next tick starts one interval after the previous one finished,
/// or as soon as a new request arrives.
async fn run_ticks(
    mut manager: SpeedManager,
    mut requests: watch::Receiver<Request>,
    interval: Duration,
    handler: SharedHandler,
    stats: watch::Sender<SaverStats>,
    faulted: Arc<AtomicBool>,
) -> LapseResult<Completion> {
    loop {
        let request = *requests.borrow_and_update();
        match manager.tick(request).await {
            Ok(TickOutcome::Continue) => {}
            Ok(TickOutcome::Finished {
                artifact,
                encoder_error: None,
            }) => return Ok(Completion::Finished(artifact)),
            Ok(TickOutcome::Finished {
                artifact,
                encoder_error: Some(e),
            }) => match registered(&handler) {
                Some(callback) => {
                    callback(e);
                    return Ok(Completion::Finished(artifact));
                }
                None => {
                    tracing::error!(error = %e, "Unhandled encoder error at end of stream");
                    faulted.store(true, Ordering::Release);
                    if let Err(cleanup) = manager.discard(&artifact).await {
                        tracing::warn!(error = %cleanup, "Failed to remove unwanted output");
                    }
                    return Err(e);
                }
            },
            Ok(TickOutcome::Canceled) => return Ok(Completion::Canceled),
            Err(e) if manager.is_terminated() => {
                tracing::error!(error = %e, "Time-lapse failed while terminating");
                return Err(e);
            }
            Err(e) => match registered(&handler) {
                Some(callback) => callback(e),
                None => {
                    tracing::error!(error = %e, "Unhandled time-lapse error; stopping");
                    faulted.store(true, Ordering::Release);
                    manager.abandon().await;
                    return Err(e);
                }
            },
        }

        stats.send_replace(manager.stats());

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = requests.changed() => {
                if changed.is_err() {
                    // Handle gone without a terminal request.
                    manager.abandon().await;
                    return Ok(Completion::Canceled);
                }
            }
        }
    }
}

//! Record a time-lapse from a synthetic frame source.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;

use lapse_common::clock::{FrameClock, RateController, RecordingClock};
use lapse_common::config::AppConfig;
use lapse_engine::TimeLapseSaver;
use lapse_media::container::read_artifact;
use lapse_media::{Artifact, DirTempStorage, EncoderArgs, FileBackend, FrameNo, RawFrame};

/// Capture length when neither `--frames` nor `--seconds` is given.
const DEFAULT_CAPTURE_SECS: u64 = 60;

pub struct RecordOptions {
    pub output: Option<PathBuf>,
    pub frames: Option<u64>,
    pub seconds: Option<f64>,
    pub fps: Option<f64>,
    pub max_duration: Option<u32>,
    pub initial_speed: Option<u32>,
    pub width: u32,
    pub height: u32,
    pub realtime: bool,
    pub temp_dir: Option<PathBuf>,
}

pub async fn run(opts: RecordOptions) -> anyhow::Result<()> {
    let app = AppConfig::load();

    let mut config = app.time_lapse.clone();
    if let Some(source_fps) = opts.fps {
        config.fps = config.effective_fps(source_fps);
    }
    if let Some(max_duration) = opts.max_duration {
        config.max_duration_secs = max_duration;
    }
    if let Some(initial_speed) = opts.initial_speed {
        config.initial_speed = initial_speed;
    }
    config.validate()?;

    let mut args = EncoderArgs::from_defaults(&app.encoder, config.fps);
    args.width = opts.width;
    args.height = opts.height;

    let frame_count = match (opts.frames, opts.seconds) {
        (Some(frames), _) => frames,
        (None, Some(seconds)) => (seconds.max(0.0) * config.fps as f64).round() as u64,
        (None, None) => DEFAULT_CAPTURE_SECS * config.fps as u64,
    };
    let output = opts
        .output
        .unwrap_or_else(|| app.output_dir.join("timelapse.lapse"));
    let storage = match opts.temp_dir {
        Some(dir) => DirTempStorage::new(dir),
        None => DirTempStorage::system(),
    };

    println!("Recording time-lapse");
    println!("  Output: {}", output.display());
    println!(
        "  Source: {}x{} @ {}fps, {} frames",
        args.width, args.height, config.fps, frame_count
    );
    println!(
        "  Ceiling: {}s, starting at {}x",
        config.max_duration_secs, config.initial_speed
    );
    println!("  Temp dir: {}", storage.dir().display());
    println!();

    let clock = FrameClock::new(config.fps);
    let tick_interval = config.tick_interval();
    let mut saver = TimeLapseSaver::create(
        Arc::new(FileBackend::new()),
        Arc::new(storage),
        args.clone(),
        config,
    )
    .await?;

    println!("Press Ctrl+C to cancel...");
    println!();

    let recording = RecordingClock::start();
    tracing::info!(started_at = recording.epoch_wall(), "Capture started");
    let mut pacer = RateController::new(clock.fps());
    let source = SyntheticSource::new(args.width, args.height, clock);
    let mut last_speed = saver.current_speed();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    for frame_no in 0..frame_count {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal?;
                println!();
                println!("Interrupted; discarding time-lapse...");
                saver.cancel().await?;
                println!("Temporary files removed.");
                return Ok(());
            }
            _ = pace(opts.realtime, &mut pacer, &recording, frame_no, last_speed, tick_interval) => {}
        }

        if let Err(e) = saver.write(source.frame(frame_no), frame_no) {
            if saver.is_faulted() {
                let cause = saver.end_write().await.err().unwrap_or(e);
                anyhow::bail!("time-lapse stopped: {cause}");
            }
            return Err(e.into());
        }

        let speed = saver.current_speed();
        if speed != last_speed {
            println!(
                "  {:>8.1}s  speed {last_speed}x -> {speed}x",
                source.clock.duration_secs(frame_no)
            );
            last_speed = speed;
        }
        if frame_no > 0 && frame_no % (source.clock.fps() as u64 * 10) == 0 {
            let stats = saver.stats();
            tracing::info!(
                frame_no,
                speed = stats.current_speed,
                written = stats.frames_written,
                cached = stats.cached_frames,
                cached_bytes = stats.cached_bytes,
                "Recording"
            );
        }
    }

    let artifact = saver.end_write().await?;
    move_artifact(artifact, &output).await?;

    let info = read_artifact(&output)?;
    println!();
    println!("Time-lapse saved to: {}", output.display());
    println!(
        "  {} frames at {}x, {:.1}s (captured {:.1}s in {:.1}s)",
        info.frame_count(),
        info.header.speed,
        info.duration_secs(),
        source.clock.duration_secs(frame_count),
        recording.elapsed_secs()
    );

    Ok(())
}

/// Wait until the next frame is due.
///
/// Realtime mode follows the capture rate. Otherwise the source gets one
/// tick interval per `speed` frames, so both savers keep up with it.
async fn pace(
    realtime: bool,
    pacer: &mut RateController,
    recording: &RecordingClock,
    frame_no: FrameNo,
    speed: u32,
    tick_interval: Duration,
) {
    if !realtime {
        if frame_no % speed.max(1) as u64 == 0 {
            tokio::time::sleep(tick_interval + tick_interval / 4).await;
        }
        return;
    }
    let now = recording.elapsed_ns();
    if !pacer.should_tick(now) {
        tokio::time::sleep(Duration::from_nanos(pacer.until_next_ns(now))).await;
        pacer.should_tick(recording.elapsed_ns());
    }
}

/// Move the finished artifact to `dest`, copying when a rename is not
/// possible (e.g. across file systems).
async fn move_artifact(artifact: Artifact, dest: &Path) -> anyhow::Result<()> {
    let source = artifact.into_path();
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if tokio::fs::rename(&source, dest).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(&source, dest)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    tokio::fs::remove_file(&source).await?;
    Ok(())
}

/// Grayscale gradient with a bar sweeping across it.
struct SyntheticSource {
    width: u32,
    height: u32,
    clock: FrameClock,
}

impl SyntheticSource {
    fn new(width: u32, height: u32, clock: FrameClock) -> Self {
        Self {
            width,
            height,
            clock,
        }
    }

    fn frame(&self, frame_no: FrameNo) -> RawFrame {
        let bar = (frame_no % self.width as u64) as u32;
        let mut data = Vec::with_capacity((self.width * self.height) as usize);
        for y in 0..self.height {
            let shade = (y * 255 / self.height.max(1)) as u8;
            data.extend((0..self.width).map(|x| if x == bar { 255 } else { shade }));
        }
        RawFrame {
            width: self.width,
            height: self.height,
            timestamp_us: self.clock.timestamp_us(frame_no),
            data: Bytes::from(data),
        }
    }
}

//! In-memory media backend that records everything the engine does.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use lapse_common::config::TimeLapseConfig;
use lapse_common::error::{LapseError, LapseResult};
use lapse_engine::{EncoderAdapter, Speed, SpeedManager};
use lapse_media::{
    Artifact, EncodedFrame, EncoderArgs, EncoderEvent, EncoderSink, FrameEncoder, FrameNo,
    FrameProcessor, MediaBackend, RawFrame, Rotation, TempStorage,
};

/// What happened to one artifact.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLog {
    pub speed: Option<u32>,
    pub frames: Vec<FrameNo>,
    pub key_frames: Vec<FrameNo>,
    pub finished: bool,
    pub aborted: bool,
    pub removed: bool,
    pub writes_after_close: usize,
}

#[derive(Default)]
pub struct Recorder {
    artifacts: Mutex<BTreeMap<PathBuf, ArtifactLog>>,
    encoded: AtomicU64,
}

impl Recorder {
    pub fn snapshot(&self) -> BTreeMap<PathBuf, ArtifactLog> {
        self.artifacts.lock().unwrap().clone()
    }

    pub fn log(&self, artifact: &Artifact) -> ArtifactLog {
        self.artifacts
            .lock()
            .unwrap()
            .get(artifact.path())
            .cloned()
            .unwrap_or_default()
    }

    /// Artifacts created and not removed.
    pub fn live_artifacts(&self) -> Vec<PathBuf> {
        self.artifacts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, log)| !log.removed)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Frames the encoder accepted.
    pub fn encoded_frames(&self) -> u64 {
        self.encoded.load(Ordering::SeqCst)
    }

    fn update(&self, path: &PathBuf, f: impl FnOnce(&mut ArtifactLog)) {
        f(self.artifacts.lock().unwrap().entry(path.clone()).or_default());
    }
}

#[derive(Debug, Default, Clone)]
pub struct Faults {
    pub unsupported: bool,
    /// Zero-based index of the submitted frame the encoder fails.
    pub encoder_error_at: Option<u64>,
    pub processor_fails_for_speed: Option<u32>,
    pub writes_fail_for_speed: Option<u32>,
    pub remove_fails: bool,
}

pub struct MockBackend {
    recorder: Arc<Recorder>,
    faults: Arc<Mutex<Faults>>,
}

pub struct MockStorage {
    recorder: Arc<Recorder>,
    faults: Arc<Mutex<Faults>>,
    seq: AtomicU64,
}

struct MockEncoder {
    sink: EncoderSink,
    recorder: Arc<Recorder>,
    error_at: Option<u64>,
    seen: u64,
    closed: bool,
}

struct MockProcessor {
    recorder: Arc<Recorder>,
    path: PathBuf,
    fail_writes: bool,
    closed: bool,
}

#[async_trait::async_trait]
impl MediaBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn is_config_supported(&self, _args: &EncoderArgs) -> LapseResult<bool> {
        Ok(!self.faults.lock().unwrap().unsupported)
    }

    fn create_encoder(
        &self,
        _args: &EncoderArgs,
        sink: EncoderSink,
    ) -> LapseResult<Box<dyn FrameEncoder>> {
        Ok(Box::new(MockEncoder {
            sink,
            recorder: self.recorder.clone(),
            error_at: self.faults.lock().unwrap().encoder_error_at,
            seen: 0,
            closed: false,
        }))
    }

    async fn create_processor(
        &self,
        output: &Artifact,
        speed: u32,
        _args: &EncoderArgs,
    ) -> LapseResult<Box<dyn FrameProcessor>> {
        let faults = self.faults.lock().unwrap().clone();
        if faults.processor_fails_for_speed == Some(speed) {
            return Err(LapseError::allocation(format!(
                "no processor for speed {speed}"
            )));
        }
        let path = output.path().to_path_buf();
        self.recorder.update(&path, |log| log.speed = Some(speed));
        Ok(Box::new(MockProcessor {
            recorder: self.recorder.clone(),
            path,
            fail_writes: faults.writes_fail_for_speed == Some(speed),
            closed: false,
        }))
    }
}

#[async_trait::async_trait]
impl TempStorage for MockStorage {
    async fn create(&self, name: &str) -> LapseResult<Artifact> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let path = PathBuf::from(format!("mem/{seq}-{name}"));
        self.recorder.update(&path, |_| {});
        Ok(Artifact::new(path))
    }

    async fn remove(&self, artifact: &Artifact) -> LapseResult<()> {
        if self.faults.lock().unwrap().remove_fails {
            return Err(LapseError::storage("disk went away"));
        }
        self.recorder
            .update(&artifact.path().to_path_buf(), |log| log.removed = true);
        Ok(())
    }
}

#[async_trait::async_trait]
impl FrameEncoder for MockEncoder {
    fn encode(&mut self, frame: RawFrame, key_frame: bool) -> LapseResult<()> {
        if self.closed {
            return Err(LapseError::encoder("closed"));
        }
        let nth = self.seen;
        self.seen += 1;
        self.recorder.encoded.fetch_add(1, Ordering::SeqCst);
        if self.error_at == Some(nth) {
            return self
                .sink
                .try_send(EncoderEvent::Error("injected failure".to_string()));
        }
        self.sink.try_send(EncoderEvent::Output {
            payload: Bytes::copy_from_slice(&frame.timestamp_us.to_le_bytes()),
            key_frame,
        })
    }

    async fn flush(&mut self) -> LapseResult<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[async_trait::async_trait]
impl FrameProcessor for MockProcessor {
    async fn write(&mut self, frame: &EncodedFrame) -> LapseResult<()> {
        if self.closed {
            self.recorder
                .update(&self.path, |log| log.writes_after_close += 1);
            return Err(LapseError::processor("closed"));
        }
        if self.fail_writes {
            return Err(LapseError::processor("write failed"));
        }
        let (frame_no, key_frame) = (frame.frame_no, frame.key_frame);
        self.recorder.update(&self.path, |log| {
            log.frames.push(frame_no);
            if key_frame {
                log.key_frames.push(frame_no);
            }
        });
        Ok(())
    }

    async fn finish(&mut self) -> LapseResult<()> {
        self.closed = true;
        self.recorder.update(&self.path, |log| log.finished = true);
        Ok(())
    }

    async fn abort(&mut self) -> LapseResult<()> {
        self.closed = true;
        self.recorder.update(&self.path, |log| log.aborted = true);
        Ok(())
    }
}

/// Mock collaborators sharing one recorder.
pub struct Harness {
    pub recorder: Arc<Recorder>,
    pub faults: Arc<Mutex<Faults>>,
    pub backend: Arc<MockBackend>,
    pub storage: Arc<MockStorage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_faults(Faults::default())
    }

    pub fn with_faults(faults: Faults) -> Self {
        let recorder = Arc::new(Recorder::default());
        let faults = Arc::new(Mutex::new(faults));
        Self {
            backend: Arc::new(MockBackend {
                recorder: recorder.clone(),
                faults: faults.clone(),
            }),
            storage: Arc::new(MockStorage {
                recorder: recorder.clone(),
                faults: faults.clone(),
                seq: AtomicU64::new(0),
            }),
            recorder,
            faults,
        }
    }

    pub fn set_faults(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.faults.lock().unwrap());
    }

    /// Adapter and manager with the tick driven by the test.
    pub async fn manager(
        &self,
        config: TimeLapseConfig,
    ) -> LapseResult<(EncoderAdapter, SpeedManager)> {
        let initial = Speed::new(config.initial_speed)?;
        let (adapter, frames) = EncoderAdapter::new(self.backend.as_ref(), &args(), initial)?;
        let manager = SpeedManager::new(
            self.backend.clone(),
            self.storage.clone(),
            args(),
            config,
            frames,
        )
        .await?;
        Ok((adapter, manager))
    }
}

pub fn config(fps: u32, max_duration_secs: u32, initial_speed: u32) -> TimeLapseConfig {
    TimeLapseConfig {
        max_duration_secs,
        fps,
        tick_interval_ms: 100,
        initial_speed,
    }
}

pub fn args() -> EncoderArgs {
    EncoderArgs {
        codec: "mock".to_string(),
        width: 2,
        height: 2,
        bitrate: 1_000,
        fps: 30,
        rotation: Rotation::None,
    }
}

pub fn raw_frame(frame_no: FrameNo) -> RawFrame {
    RawFrame {
        width: 2,
        height: 2,
        timestamp_us: frame_no as i64 * 33_333,
        data: Bytes::from_static(&[0u8; 16]),
    }
}

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::mpsc;

use lapse_common::error::{LapseError, LapseResult};

use crate::frame::{EncodedFrame, EncoderArgs, RawFrame};

/// A durable or temporary output file produced by a processor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Asynchronous notification from a frame encoder.
#[derive(Debug, Clone)]
pub enum EncoderEvent {
    /// The oldest pending frame finished encoding.
    Output { payload: Bytes, key_frame: bool },
    /// The oldest pending frame failed and will produce no output.
    Error(String),
}

/// Sending half of the channel an encoder reports through.
///
/// Every submitted frame yields exactly one event, in submission order.
#[derive(Debug, Clone)]
pub struct EncoderSink {
    tx: mpsc::Sender<EncoderEvent>,
}

impl EncoderSink {
    /// Create a sink and the receiver the engine drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EncoderEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Report one encoded frame. Returns false once nobody is listening.
    pub async fn output(&self, payload: Bytes, key_frame: bool) -> bool {
        self.tx
            .send(EncoderEvent::Output { payload, key_frame })
            .await
            .is_ok()
    }

    /// Report an encoder failure. Returns false once nobody is listening.
    pub async fn error(&self, message: impl Into<String>) -> bool {
        self.tx.send(EncoderEvent::Error(message.into())).await.is_ok()
    }

    /// Non-blocking report for encoders that signal from synchronous
    /// callbacks. Fails if the channel is full or closed.
    pub fn try_send(&self, event: EncoderEvent) -> LapseResult<()> {
        self.tx.try_send(event).map_err(|e| {
            LapseError::encoder(format!("Encoder output queue rejected event: {e}"))
        })
    }
}

/// Raw-frame encoder capability.
#[async_trait::async_trait]
pub trait FrameEncoder: Send {
    /// Queue a frame for encoding. Never waits for the encode itself.
    fn encode(&mut self, frame: RawFrame, key_frame: bool) -> LapseResult<()>;

    /// Resolve once every queued frame has been reported to the sink.
    async fn flush(&mut self) -> LapseResult<()>;

    /// Release the encoder. Later `encode` calls fail.
    fn close(&mut self);
}

/// Mux pipeline writing encoded frames into one artifact.
///
/// Calls on one processor are serialized by `&mut self`.
#[async_trait::async_trait]
pub trait FrameProcessor: Send {
    async fn write(&mut self, frame: &EncodedFrame) -> LapseResult<()>;

    /// Flush and finalize the artifact.
    async fn finish(&mut self) -> LapseResult<()>;

    /// Stop without finalizing. The artifact contents are undefined.
    async fn abort(&mut self) -> LapseResult<()>;
}

/// Temporary file capability.
#[async_trait::async_trait]
pub trait TempStorage: Send + Sync {
    /// Allocate a fresh artifact. `name` only needs to be unique among
    /// concurrently live artifacts of one time-lapse.
    async fn create(&self, name: &str) -> LapseResult<Artifact>;

    async fn remove(&self, artifact: &Artifact) -> LapseResult<()>;
}

/// Factory for encoders and processors.
#[async_trait::async_trait]
pub trait MediaBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Whether the encoder accepts `args`. Must not allocate anything.
    async fn is_config_supported(&self, args: &EncoderArgs) -> LapseResult<bool>;

    fn create_encoder(
        &self,
        args: &EncoderArgs,
        sink: EncoderSink,
    ) -> LapseResult<Box<dyn FrameEncoder>>;

    /// Build a processor writing into `output`. `speed` is the decimation
    /// factor baked into that output.
    async fn create_processor(
        &self,
        output: &Artifact,
        speed: u32,
        args: &EncoderArgs,
    ) -> LapseResult<Box<dyn FrameProcessor>>;
}

pub mod file;

pub use file::{DirTempStorage, FileBackend};

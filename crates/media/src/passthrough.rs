//! Passthrough "codec": frames the raw pixels with a small header.
//!
//! Encoding runs on a worker task so `encode` never blocks the caller,
//! mirroring how hardware encoders report output asynchronously.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use lapse_common::error::{LapseError, LapseResult};

use crate::backend::{EncoderSink, FrameEncoder};
use crate::frame::{EncoderArgs, RawFrame};

/// Codec name handled by [`PassthroughEncoder`].
pub const PASSTHROUGH_CODEC: &str = "raw";

/// Size of the per-frame header prepended to every payload.
pub const FRAME_HEADER_LEN: usize = 16;

enum Command {
    Encode { frame: RawFrame, key_frame: bool },
    Flush(oneshot::Sender<()>),
}

pub struct PassthroughEncoder {
    tx: Option<mpsc::UnboundedSender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl PassthroughEncoder {
    /// Spawn the worker task. Must be called inside a tokio runtime.
    pub fn spawn(args: &EncoderArgs, sink: EncoderSink) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(args.width, args.height, rx, sink));
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    fn sender(&self) -> LapseResult<&mpsc::UnboundedSender<Command>> {
        self.tx
            .as_ref()
            .ok_or_else(|| LapseError::encoder("Encoder is closed"))
    }
}

#[async_trait::async_trait]
impl FrameEncoder for PassthroughEncoder {
    fn encode(&mut self, frame: RawFrame, key_frame: bool) -> LapseResult<()> {
        self.sender()?
            .send(Command::Encode { frame, key_frame })
            .map_err(|_| LapseError::encoder("Encoder worker exited"))
    }

    async fn flush(&mut self) -> LapseResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.sender()?
            .send(Command::Flush(ack_tx))
            .map_err(|_| LapseError::encoder("Encoder worker exited"))?;
        ack_rx
            .await
            .map_err(|_| LapseError::encoder("Encoder worker exited before flushing"))
    }

    fn close(&mut self) {
        // Dropping the sender lets the worker drain and exit.
        self.tx = None;
        self.worker = None;
    }
}

impl Drop for PassthroughEncoder {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_worker(
    width: u32,
    height: u32,
    mut rx: mpsc::UnboundedReceiver<Command>,
    sink: EncoderSink,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Encode { frame, key_frame } => {
                if frame.width != width || frame.height != height {
                    let message = format!(
                        "frame is {}x{}, encoder configured for {width}x{height}",
                        frame.width, frame.height
                    );
                    tracing::warn!(%message, "Rejecting frame");
                    if !sink.error(message).await {
                        break;
                    }
                    continue;
                }
                if !sink.output(encode_payload(&frame), key_frame).await {
                    break;
                }
            }
            Command::Flush(ack) => {
                // Every earlier output is already in the sink channel.
                let _ = ack.send(());
            }
        }
    }
    tracing::trace!("Passthrough encoder worker stopped");
}

/// Header (`width`, `height`, `timestamp_us`, all little-endian) followed by
/// the raw pixel data.
pub fn encode_payload(frame: &RawFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + frame.data.len());
    buf.put_u32_le(frame.width);
    buf.put_u32_le(frame.height);
    buf.put_i64_le(frame.timestamp_us);
    buf.put_slice(&frame.data);
    buf.freeze()
}

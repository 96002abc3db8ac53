//! Minimal time-lapse container.
//!
//! Layout: 8-byte magic, little-endian `u32` header length, JSON header,
//! then one record per frame:
//!
//! ```text
//! flags: u8 (bit 0 = key frame) | frame_no: u64 | len: u32 | payload
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufWriter};

use lapse_common::error::{LapseError, LapseResult};

use crate::backend::FrameProcessor;
use crate::frame::{EncodedFrame, FrameNo, Rotation};

pub const MAGIC: &[u8; 8] = b"LAPSEv01";

const FLAG_KEY_FRAME: u8 = 0x01;

/// Metadata written at the start of every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// Capture and playback rate.
    pub fps: u32,
    /// Decimation factor: one stored frame per `speed` captured frames.
    pub speed: u32,
    pub created_at: String,
}

/// Writes encoded frames to a container file.
pub struct FileProcessor {
    path: PathBuf,
    writer: Option<BufWriter<tokio::fs::File>>,
    frames_written: u64,
}

impl FileProcessor {
    /// Truncate `path` and write the container header.
    pub async fn create(path: &Path, header: &ContainerHeader) -> LapseResult<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| {
                LapseError::allocation(format!("Failed to open {}: {e}", path.display()))
            })?;
        let mut writer = BufWriter::new(file);

        let header_json = serde_json::to_vec(header)?;
        writer.write_all(MAGIC).await?;
        writer.write_u32_le(header_json.len() as u32).await?;
        writer.write_all(&header_json).await?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn writer(&mut self) -> LapseResult<&mut BufWriter<tokio::fs::File>> {
        let path = &self.path;
        self.writer.as_mut().ok_or_else(|| {
            LapseError::processor(format!("{} is already closed", path.display()))
        })
    }
}

#[async_trait::async_trait]
impl FrameProcessor for FileProcessor {
    async fn write(&mut self, frame: &EncodedFrame) -> LapseResult<()> {
        let writer = self.writer()?;
        let flags = if frame.key_frame { FLAG_KEY_FRAME } else { 0 };
        let result = async {
            writer.write_u8(flags).await?;
            writer.write_u64_le(frame.frame_no).await?;
            writer.write_u32_le(frame.payload.len() as u32).await?;
            writer.write_all(&frame.payload).await
        }
        .await;
        result.map_err(|e| {
            LapseError::processor(format!("Failed to write frame {}: {e}", frame.frame_no))
        })?;
        self.frames_written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> LapseResult<()> {
        let mut writer = self.writer.take().ok_or_else(|| {
            LapseError::processor(format!("{} is already closed", self.path.display()))
        })?;
        writer
            .flush()
            .await
            .map_err(|e| LapseError::processor(format!("Failed to flush: {e}")))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| LapseError::processor(format!("Failed to sync: {e}")))?;
        tracing::debug!(
            path = %self.path.display(),
            frames = self.frames_written,
            "Container finalized"
        );
        Ok(())
    }

    async fn abort(&mut self) -> LapseResult<()> {
        // Buffered bytes are discarded with the writer.
        self.writer = None;
        Ok(())
    }
}

/// Summary of a finished artifact.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub header: ContainerHeader,
    pub frame_numbers: Vec<FrameNo>,
    pub key_frames: u64,
    pub payload_bytes: u64,
}

impl ArtifactInfo {
    pub fn frame_count(&self) -> u64 {
        self.frame_numbers.len() as u64
    }

    /// Playback length at the container's rate.
    pub fn duration_secs(&self) -> f64 {
        lapse_common::clock::FrameClock::new(self.header.fps).duration_secs(self.frame_count())
    }
}

/// Read back the header and frame index of a container.
pub fn read_artifact(path: &Path) -> LapseResult<ArtifactInfo> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(LapseError::invalid_argument(format!(
            "{} is not a lapse container",
            path.display()
        )));
    }

    let header_len = read_u32(&mut reader)? as usize;
    let mut header_json = vec![0u8; header_len];
    reader.read_exact(&mut header_json)?;
    let header: ContainerHeader = serde_json::from_slice(&header_json)?;

    let mut frame_numbers = Vec::new();
    let mut key_frames = 0;
    let mut payload_bytes = 0;
    loop {
        let mut flags = [0u8; 1];
        match reader.read_exact(&mut flags) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let frame_no = read_u64(&mut reader)?;
        let len = read_u32(&mut reader)?;
        std::io::copy(&mut (&mut reader).take(len as u64), &mut std::io::sink())?;

        if flags[0] & FLAG_KEY_FRAME != 0 {
            key_frames += 1;
        }
        payload_bytes += len as u64;
        frame_numbers.push(frame_no);
    }

    Ok(ArtifactInfo {
        header,
        frame_numbers,
        key_frames,
        payload_bytes,
    })
}

fn read_u32(reader: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

//! File-backed media backend: passthrough encoder, container processor and
//! a temp directory for in-flight artifacts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use lapse_common::clock::wall_clock_rfc3339;
use lapse_common::error::{LapseError, LapseResult};

use super::{Artifact, EncoderSink, FrameEncoder, FrameProcessor, MediaBackend, TempStorage};
use crate::container::{ContainerHeader, FileProcessor};
use crate::frame::EncoderArgs;
use crate::passthrough::{PassthroughEncoder, PASSTHROUGH_CODEC};

/// Largest frame the passthrough encoder accepts (8K UHD).
pub const MAX_WIDTH: u32 = 7680;
pub const MAX_HEIGHT: u32 = 4320;

/// Backend writing lapse containers to disk.
#[derive(Debug, Default, Clone)]
pub struct FileBackend;

impl FileBackend {
    pub fn new() -> Self {
        Self
    }

    /// Why `args` is unsupported, or `None` if it is supported.
    pub fn unsupported_reason(args: &EncoderArgs) -> Option<String> {
        if args.codec != PASSTHROUGH_CODEC {
            return Some(format!(
                "codec {:?} is not available (supported: {PASSTHROUGH_CODEC:?})",
                args.codec
            ));
        }
        if args.width == 0 || args.height == 0 {
            return Some("frame dimensions must be non-zero".to_string());
        }
        if args.width > MAX_WIDTH || args.height > MAX_HEIGHT {
            return Some(format!(
                "{}x{} exceeds the {MAX_WIDTH}x{MAX_HEIGHT} limit",
                args.width, args.height
            ));
        }
        if args.fps == 0 {
            return Some("fps must be non-zero".to_string());
        }
        if args.bitrate == 0 {
            return Some("bitrate must be non-zero".to_string());
        }
        None
    }
}

#[async_trait::async_trait]
impl MediaBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn is_config_supported(&self, args: &EncoderArgs) -> LapseResult<bool> {
        Ok(Self::unsupported_reason(args).is_none())
    }

    fn create_encoder(
        &self,
        args: &EncoderArgs,
        sink: EncoderSink,
    ) -> LapseResult<Box<dyn FrameEncoder>> {
        if let Some(reason) = Self::unsupported_reason(args) {
            return Err(LapseError::unsupported_config(reason));
        }
        Ok(Box::new(PassthroughEncoder::spawn(args, sink)))
    }

    async fn create_processor(
        &self,
        output: &Artifact,
        speed: u32,
        args: &EncoderArgs,
    ) -> LapseResult<Box<dyn FrameProcessor>> {
        let header = ContainerHeader {
            codec: args.codec.clone(),
            width: args.width,
            height: args.height,
            rotation: args.rotation,
            fps: args.fps,
            speed,
            created_at: wall_clock_rfc3339(),
        };
        let processor = FileProcessor::create(output.path(), &header).await?;
        Ok(Box::new(processor))
    }
}

/// Temporary artifacts under one directory.
#[derive(Debug)]
pub struct DirTempStorage {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl DirTempStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Storage under the system temp directory.
    pub fn system() -> Self {
        Self::new(std::env::temp_dir().join("lapse"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait::async_trait]
impl TempStorage for DirTempStorage {
    async fn create(&self, name: &str) -> LapseResult<Artifact> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            LapseError::allocation(format!("Failed to create {}: {e}", self.dir.display()))
        })?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = self
            .dir
            .join(format!("{}-{seq}-{name}.lapse", std::process::id()));
        tokio::fs::File::create(&path).await.map_err(|e| {
            LapseError::allocation(format!("Failed to create {}: {e}", path.display()))
        })?;

        tracing::debug!(path = %path.display(), "Temp artifact created");
        Ok(Artifact::new(path))
    }

    async fn remove(&self, artifact: &Artifact) -> LapseResult<()> {
        match tokio::fs::remove_file(artifact.path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LapseError::storage(format!(
                "Failed to remove {}: {e}",
                artifact.path().display()
            ))),
        }
    }
}

//! Error types shared across Lapse crates.

/// Top-level error type for Lapse operations.
#[derive(Debug, thiserror::Error)]
pub enum LapseError {
    #[error("Unsupported encoder configuration: {message}")]
    UnsupportedConfig { message: String },

    #[error("Allocation failed: {message}")]
    Allocation { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Processor error: {message}")]
    Processor { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Time-lapse was canceled")]
    Canceled,

    #[error("Time-lapse pipeline stopped after an unrecoverable error: {message}")]
    Faulted { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using LapseError.
pub type LapseResult<T> = Result<T, LapseError>;

impl LapseError {
    pub fn unsupported_config(msg: impl Into<String>) -> Self {
        Self::UnsupportedConfig {
            message: msg.into(),
        }
    }

    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn processor(msg: impl Into<String>) -> Self {
        Self::Processor {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn faulted(msg: impl Into<String>) -> Self {
        Self::Faulted {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_message() {
        let err = LapseError::unsupported_config("codec vp9 at 8K");
        assert_eq!(
            err.to_string(),
            "Unsupported encoder configuration: codec vp9 at 8K"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: LapseError = io.into();
        assert!(matches!(err, LapseError::Io(_)));
    }
}

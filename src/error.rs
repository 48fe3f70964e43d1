use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReframeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Encoding failed: {message}{}", diagnostic(.stderr))]
    Encode {
        message: String,
        stderr: Option<String>,
    },

    #[error("Frame {frame_index} I/O error: {message}")]
    FrameIo { frame_index: u64, message: String },

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded after {frames} frames")]
    DeadlineExceeded { frames: u64 },
}

impl ReframeError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn encode_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::Encode {
            message: message.into(),
            stderr,
        }
    }

    pub fn frame_io(frame_index: u64, message: impl Into<String>) -> Self {
        Self::FrameIo {
            frame_index,
            message: message.into(),
        }
    }

    /// Transcoder diagnostics, when the failure came from an external process.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Encode { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }
}

/// Lines of transcoder stderr kept in the displayed error
const DIAGNOSTIC_LINES: usize = 8;

/// Tail of the transcoder's stderr, where ffmpeg puts the actual failure.
fn diagnostic(stderr: &Option<String>) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };
    let lines: Vec<&str> = stderr.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return String::new();
    }
    let tail = &lines[lines.len().saturating_sub(DIAGNOSTIC_LINES)..];
    format!("\n{}", tail.join("\n"))
}

pub type Result<T> = std::result::Result<T, ReframeError>;

// Media processing over external ffmpeg/ffprobe processes
//
// - commands: ffmpeg argument builders
// - processor: the ffmpeg-backed Transcoder
// - probe: ffprobe stream information
// - frames: raw-video frame source and sink for the tracking loop

pub mod commands;
pub mod frames;
pub mod probe;
pub mod processor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use commands::*;
pub use frames::*;
pub use probe::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;
use crate::geometry::BoundingBox;

/// A final encode of an intermediate video into the deliverable file
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    /// Video to re-encode
    pub input: PathBuf,
    /// File whose audio track is carried over, if any
    pub audio_source: Option<PathBuf>,
    pub output: PathBuf,
}

/// External transcoder operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encode a video into the final container/codec combination
    async fn encode(&self, job: &EncodeJob) -> Result<()>;

    /// Crop a fixed pixel window out of every frame
    async fn crop(&self, input: &Path, output: &Path, window: &BoundingBox) -> Result<()>;

    /// Cut a time range out of a video
    async fn trim(&self, input: &Path, output: &Path, start: f64, duration: f64) -> Result<()>;

    /// Save the frame at `at_seconds` as an image
    async fn extract_frame(&self, input: &Path, at_seconds: f64, output: &Path) -> Result<()>;

    /// Check if the transcoder binary is available
    fn check_availability(&self) -> Result<()>;

    /// Get transcoder version information
    async fn version(&self) -> Result<String>;
}

/// Factory for creating transcoder instances
pub struct TranscoderFactory;

impl TranscoderFactory {
    /// Create the default transcoder implementation (FFmpeg-based)
    pub fn create_transcoder(config: MediaConfig) -> Arc<dyn Transcoder> {
        Arc::new(processor::FfmpegTranscoder::new(config))
    }
}

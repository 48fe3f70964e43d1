// Crop strategies
//
// Both strategies share the geometry module, so the static window of a tracked
// crop is the exact window a fixed crop would use for the same session.
//
// - fixed: one transcoder pass with a constant crop window
// - tracked: per-frame window following the detected subject

pub mod fixed;
pub mod tracked;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub use fixed::FixedWindowCrop;
pub use tracked::{CropPlan, CropReport, TrackedCrop, TrackedCropper};

use crate::cancel::RunControl;
use crate::config::Config;
use crate::detect::ObjectDetector;
use crate::error::{ReframeError, Result};
use crate::geometry::{BoundingBox, SessionConfig};
use crate::media::{Transcoder, VideoInfo};

/// One crop invocation. `info` is the probe result for `input`.
#[derive(Debug, Clone)]
pub struct CropRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub info: VideoInfo,
    pub session: SessionConfig,
}

/// What a strategy produced.
#[derive(Debug, Clone)]
pub struct CropOutcome {
    pub output: PathBuf,
    /// Crop window of the first frame, in source pixels
    pub initial_window: BoundingBox,
    pub output_width: u32,
    pub output_height: u32,
    /// Per-frame statistics, tracked crops only
    pub report: Option<CropReport>,
}

/// A way of turning a source video into a cropped one
#[async_trait]
pub trait CropStrategy: Send + Sync {
    async fn crop(&self, request: &CropRequest, control: &RunControl) -> Result<CropOutcome>;

    fn mode(&self) -> CropMode;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropMode {
    /// Constant window from the session config
    Fixed,
    /// Window follows the subject
    Tracked,
}

impl fmt::Display for CropMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CropMode::Fixed => f.write_str("fixed"),
            CropMode::Tracked => f.write_str("tracked"),
        }
    }
}

impl FromStr for CropMode {
    type Err = ReframeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(CropMode::Fixed),
            "tracked" | "track" => Ok(CropMode::Tracked),
            other => Err(ReframeError::invalid_input(format!(
                "Unknown crop mode '{}' (expected fixed or tracked)",
                other
            ))),
        }
    }
}

/// Factory for creating crop strategies
pub struct CropStrategyFactory;

impl CropStrategyFactory {
    /// Tracked mode needs a loaded detector; fixed mode ignores it.
    pub fn create_strategy(
        mode: CropMode,
        config: &Config,
        transcoder: Arc<dyn Transcoder>,
        detector: Option<Arc<dyn ObjectDetector>>,
    ) -> Result<Box<dyn CropStrategy>> {
        match mode {
            CropMode::Fixed => Ok(Box::new(FixedWindowCrop::new(transcoder))),
            CropMode::Tracked => {
                let detector = detector.ok_or_else(|| {
                    ReframeError::Model("Tracked crop requires a subject detector".to_string())
                })?;
                Ok(Box::new(TrackedCrop::new(config, transcoder, detector)))
            }
        }
    }
}

/// Temporary file in the destination directory, moved into place by [`persist_output`].
pub(crate) fn staged_output(output: &Path) -> Result<NamedTempFile> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    // Keep the extension, ffmpeg picks the container from it
    let suffix = output
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    Ok(tempfile::Builder::new()
        .prefix(".reframe-")
        .suffix(&suffix)
        .tempfile_in(dir)?)
}

pub(crate) fn persist_output(staged: NamedTempFile, output: &Path) -> Result<()> {
    staged.persist(output).map_err(|e| ReframeError::Io(e.error))?;
    Ok(())
}

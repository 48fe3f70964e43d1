use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cancel::RunControl;
use crate::config::Config;
use crate::crop::{
    persist_output, staged_output, CropMode, CropOutcome, CropRequest, CropStrategy, CropStrategyFactory,
};
use crate::detect::{ObjectDetector, YoloDetector};
use crate::error::{ReframeError, Result};
use crate::geometry::{BoundingBox, SessionConfig};
use crate::media::{probe_video, Transcoder, TranscoderFactory, VideoInfo};
use crate::preview::render_preview;
use crate::timecode::parse_timecode;

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// Result of a directory run
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: Vec<CropOutcome>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct Workflow {
    config: Config,
    transcoder: Arc<dyn Transcoder>,
}

impl Workflow {
    pub fn new(config: Config) -> Result<Self> {
        let transcoder = TranscoderFactory::create_transcoder(config.media.clone());

        // Check dependencies
        transcoder.check_availability()?;

        Ok(Self::with_transcoder(config, transcoder))
    }

    /// Build a workflow around an existing transcoder, without availability checks.
    pub fn with_transcoder(config: Config, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { config, transcoder }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transcoder(&self) -> &dyn Transcoder {
        self.transcoder.as_ref()
    }

    /// Load the subject detection model named in the config.
    pub fn load_detector(&self) -> Result<Arc<dyn ObjectDetector>> {
        info!("Loading detection model {}", self.config.detection.model_path);
        Ok(Arc::new(YoloDetector::load(&self.config.detection)?))
    }

    pub async fn probe<P: AsRef<Path>>(&self, path: P) -> Result<VideoInfo> {
        probe_video(&self.config.media.probe_path, path).await
    }

    /// Build the strategy for `mode`; tracked mode loads the detection model.
    pub fn strategy(&self, mode: CropMode) -> Result<Box<dyn CropStrategy>> {
        let detector = match mode {
            CropMode::Tracked => Some(self.load_detector()?),
            CropMode::Fixed => None,
        };
        CropStrategyFactory::create_strategy(mode, &self.config, self.transcoder.clone(), detector)
    }

    /// Crop one video. When `output` is `None` the result lands next to the input.
    pub async fn crop_video<P: AsRef<Path>>(
        &self,
        input: P,
        output: Option<PathBuf>,
        session: &SessionConfig,
        mode: CropMode,
        control: &RunControl,
    ) -> Result<CropOutcome> {
        let input = input.as_ref();
        session.validate()?;
        if !input.exists() {
            return Err(ReframeError::FileNotFound(input.display().to_string()));
        }

        let strategy = self.strategy(mode)?;
        let output = output.unwrap_or_else(|| default_output_path(input, None, mode, session));
        self.crop_with(strategy.as_ref(), input, output, session, control).await
    }

    async fn crop_with(
        &self,
        strategy: &dyn CropStrategy,
        input: &Path,
        output: PathBuf,
        session: &SessionConfig,
        control: &RunControl,
    ) -> Result<CropOutcome> {
        if same_file(input, &output) {
            return Err(ReframeError::invalid_input(format!(
                "Output would overwrite the input: {}",
                output.display()
            )));
        }

        info!("Processing {} ({} crop)", input.display(), strategy.mode());
        let info = self.probe(input).await?;
        let request = CropRequest {
            input: input.to_path_buf(),
            output,
            info,
            session: *session,
        };

        let outcome = strategy.crop(&request, control).await?;
        info!("Wrote {}", outcome.output.display());
        Ok(outcome)
    }

    /// Cut `[start, end)` out of `input`. Times are `MM:SS[.ss]` or `HH:MM:SS[.ss]`.
    pub async fn extract_segment<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        start: &str,
        end: &str,
        output: Q,
    ) -> Result<()> {
        let input = input.as_ref();
        let output = output.as_ref();

        let start_secs = parse_timecode(start)?;
        let end_secs = parse_timecode(end)?;
        if end_secs <= start_secs {
            return Err(ReframeError::invalid_input(format!(
                "End time {} must be after start time {}",
                end, start
            )));
        }

        if !input.exists() {
            return Err(ReframeError::FileNotFound(input.display().to_string()));
        }

        let info = self.probe(input).await?;
        if info.duration > 0.0 && end_secs > info.duration {
            return Err(ReframeError::invalid_input(format!(
                "End time {} is past the end of the video ({:.2}s)",
                end, info.duration
            )));
        }

        let staged = staged_output(output)?;
        self.transcoder
            .trim(input, staged.path(), start_secs, end_secs - start_secs)
            .await?;
        persist_output(staged, output)?;

        info!("Extracted {} - {} to {}", start, end, output.display());
        Ok(())
    }

    /// Save a still of `input` with the crop window of `session` outlined.
    pub async fn preview<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        session: &SessionConfig,
        output: Q,
    ) -> Result<BoundingBox> {
        let input = input.as_ref();
        session.validate()?;
        let info = self.probe(input).await?;
        render_preview(self.transcoder.as_ref(), input, &info, session, output.as_ref()).await
    }

    /// Crop every video under `input_dir`. A failed file is logged and skipped.
    pub async fn process_directory<P: AsRef<Path>>(
        &self,
        input_dir: P,
        output_dir: Option<PathBuf>,
        session: &SessionConfig,
        mode: CropMode,
        control: &RunControl,
    ) -> Result<BatchSummary> {
        let input_dir = input_dir.as_ref();
        info!("Processing directory: {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(ReframeError::invalid_input(format!(
                "Input path is not a directory: {}",
                input_dir.display()
            )));
        }
        session.validate()?;

        let output_dir = output_dir.unwrap_or_else(|| input_dir.to_path_buf());
        tokio::fs::create_dir_all(&output_dir).await?;

        let video_files = find_videos(input_dir);
        info!("Found {} video files to process", video_files.len());

        let mut summary = BatchSummary::default();
        if video_files.is_empty() {
            return Ok(summary);
        }

        // One strategy (and model load) for the whole batch
        let strategy = self.strategy(mode)?;

        for video_path in video_files {
            control.check(0)?;
            let output = default_output_path(&video_path, Some(&output_dir), mode, session);
            match self
                .crop_with(strategy.as_ref(), &video_path, output, session, control)
                .await
            {
                Ok(outcome) => {
                    info!("Successfully processed: {}", video_path.display());
                    summary.processed.push(outcome);
                }
                Err(e @ (ReframeError::Cancelled | ReframeError::DeadlineExceeded { .. })) => return Err(e),
                Err(e) => {
                    warn!("Failed to process {}: {}", video_path.display(), e);
                    summary.failed.push((video_path, e.to_string()));
                }
            }
        }

        Ok(summary)
    }
}

/// Video files below `dir`, in a stable order. Outputs of earlier runs are skipped.
pub fn find_videos(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .filter(|path| {
            let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
            !stem.contains("_cropped_") && !stem.contains("_tracked_")
        })
        .collect()
}

/// `<stem>_cropped_<ratio>_<cx>_<cy>.mp4` or `<stem>_tracked_<ratio>.mp4`.
pub fn default_output_path(
    input: &Path,
    output_dir: Option<&Path>,
    mode: CropMode,
    session: &SessionConfig,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    let ratio = session.aspect_ratio.as_str().replace(':', "x");

    let name = match mode {
        CropMode::Fixed => format!(
            "{}_cropped_{}_{}_{}.mp4",
            stem,
            ratio,
            (session.center_x * 100.0).round() as u32,
            (session.center_y * 100.0).round() as u32
        ),
        CropMode::Tracked => format!("{}_tracked_{}.mp4", stem, ratio),
    };

    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(name)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

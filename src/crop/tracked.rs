//! Subject-following crop.
//!
//! Frames are decoded, positioned by a [`TrackingSession`], cropped to a fixed
//! size and written to a loosely compressed intermediate, which the
//! transcoder then re-encodes (with the source audio) into the final file.

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::{persist_output, staged_output, CropMode, CropOutcome, CropRequest, CropStrategy};
use crate::cancel::RunControl;
use crate::config::{Config, MediaConfig, TrackingConfig};
use crate::detect::{ObjectDetector, SubjectDetector};
use crate::error::{ReframeError, Result};
use crate::geometry::{AspectRatio, BoundingBox, CropWindow, SessionConfig};
use crate::media::{EncodeJob, FfmpegFramePipes, FramePipes, FrameSink, FrameSource, Transcoder};
use crate::track::{BoxSource, TemplateTrackerFactory, TrackerFactory, TrackingSession};

/// Fixed geometry of one tracked crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropPlan {
    pub frame_width: u32,
    pub frame_height: u32,
    /// Static crop window; also the first frame's detection search region
    pub initial_window: BoundingBox,
    pub output_width: u32,
    pub output_height: u32,
    /// Frame count hint for progress reporting
    pub expected_frames: Option<u64>,
}

impl CropPlan {
    /// Plan for the session's crop window.
    pub fn new(frame_width: u32, frame_height: u32, session: &SessionConfig) -> Result<Self> {
        let window = session.crop_window(frame_width, frame_height)?;
        Self::from_window(frame_width, frame_height, session.aspect_ratio, &window)
    }

    /// Plan for a normalized initial window, which is also the first frame's
    /// search region. The crop size is taken from it, with `aspect_ratio`
    /// enforced, and never changes afterwards.
    pub fn from_window(
        frame_width: u32,
        frame_height: u32,
        aspect_ratio: AspectRatio,
        window: &CropWindow,
    ) -> Result<Self> {
        let initial_window = window.to_crop_box(frame_width, frame_height, aspect_ratio)?;
        Ok(Self {
            frame_width,
            frame_height,
            initial_window,
            output_width: initial_window.width,
            output_height: initial_window.height,
            expected_frames: None,
        })
    }

    pub fn with_expected_frames(mut self, frames: Option<u64>) -> Self {
        self.expected_frames = frames;
        self
    }

    /// Crop window centered on `subject` in a `frame_width x frame_height` frame.
    pub fn window_for(&self, subject: &BoundingBox, frame_width: u32, frame_height: u32) -> BoundingBox {
        let (cx, cy) = subject.center();
        BoundingBox::centered_at(
            cx,
            cy,
            self.initial_window.width,
            self.initial_window.height,
            frame_width,
            frame_height,
        )
    }
}

/// Per-invocation frame statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CropReport {
    pub frames_written: u64,
    pub output_width: u32,
    pub output_height: u32,
    pub tracker_frames: u64,
    pub detection_frames: u64,
    pub last_known_frames: u64,
    pub static_frames: u64,
}

impl CropReport {
    fn new(output_width: u32, output_height: u32) -> Self {
        Self {
            output_width,
            output_height,
            ..Self::default()
        }
    }

    fn record(&mut self, source: BoxSource) {
        self.frames_written += 1;
        match source {
            BoxSource::Tracker => self.tracker_frames += 1,
            BoxSource::Detection => self.detection_frames += 1,
            BoxSource::LastKnown => self.last_known_frames += 1,
            BoxSource::StaticWindow => self.static_frames += 1,
        }
    }
}

impl fmt::Display for CropReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames at {}x{} (tracked {}, detected {}, last known {}, static {})",
            self.frames_written,
            self.output_width,
            self.output_height,
            self.tracker_frames,
            self.detection_frames,
            self.last_known_frames,
            self.static_frames
        )
    }
}

/// Runs the per-frame detect/track/crop loop over any frame source and sink.
#[derive(Clone)]
pub struct TrackedCropper {
    detector: SubjectDetector,
    factory: Arc<dyn TrackerFactory>,
    tracking: TrackingConfig,
    show_progress: bool,
}

impl TrackedCropper {
    pub fn new(detector: SubjectDetector, factory: Arc<dyn TrackerFactory>, tracking: TrackingConfig) -> Self {
        Self {
            detector,
            factory,
            tracking,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, expected_frames: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = match expected_frames {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        pb.set_style(style);
        pb
    }

    /// Crop every frame of `source` into `sink`, in order.
    ///
    /// The sink is finished on success. On error it is left unfinished so the
    /// caller can discard it.
    pub fn process(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        plan: &CropPlan,
        control: &RunControl,
    ) -> Result<CropReport> {
        let (width, height) = source.dimensions();
        if (width, height) != (plan.frame_width, plan.frame_height) {
            return Err(ReframeError::frame_io(
                0,
                format!(
                    "Source frames are {}x{}, the crop plan expects {}x{}",
                    width, height, plan.frame_width, plan.frame_height
                ),
            ));
        }

        let mut session = TrackingSession::new(
            self.detector.clone(),
            self.factory.clone(),
            plan.initial_window,
            &self.tracking,
        );
        let mut report = CropReport::new(plan.output_width, plan.output_height);
        let progress = self.progress_bar(plan.expected_frames);
        let mut last_state = session.state();

        loop {
            control.check(report.frames_written)?;
            let Some(frame) = source.next_frame()? else {
                break;
            };

            let observation = if report.frames_written == 0 {
                session.initialize(&frame.image, plan.initial_window)
            } else {
                session.advance(&frame.image)
            };
            if observation.state != last_state {
                debug!("Frame {}: {} -> {}", frame.index, last_state, observation.state);
                last_state = observation.state;
            }

            let window = plan.window_for(&observation.bbox, frame.width(), frame.height());
            let cropped = imageops::crop_imm(&frame.image, window.x, window.y, window.width, window.height)
                .to_image();
            let output = if cropped.dimensions() != (plan.output_width, plan.output_height) {
                imageops::resize(&cropped, plan.output_width, plan.output_height, FilterType::Triangle)
            } else {
                cropped
            };

            sink.write_frame(&output)?;
            report.record(observation.source);
            progress.inc(1);
        }

        if report.frames_written == 0 {
            progress.abandon();
            return Err(ReframeError::frame_io(0, "Source produced no frames"));
        }

        let finished = sink.finish()?;
        progress.finish_and_clear();
        if finished != report.frames_written {
            return Err(ReframeError::frame_io(
                finished,
                format!("Sink wrote {} of {} frames", finished, report.frames_written),
            ));
        }

        info!("Cropped {}", report);
        Ok(report)
    }
}

/// End-to-end tracked crop: decode, track, intermediate encode, final encode.
pub struct TrackedCrop {
    media: MediaConfig,
    cropper: TrackedCropper,
    transcoder: Arc<dyn Transcoder>,
    pipes: Arc<dyn FramePipes>,
}

impl TrackedCrop {
    pub fn new(config: &Config, transcoder: Arc<dyn Transcoder>, detector: Arc<dyn ObjectDetector>) -> Self {
        let cropper = TrackedCropper::new(
            SubjectDetector::from_config(detector, &config.detection),
            Arc::new(TemplateTrackerFactory::new(config.tracking.clone())),
            config.tracking.clone(),
        );
        Self {
            media: config.media.clone(),
            cropper,
            transcoder,
            pipes: Arc::new(FfmpegFramePipes::new(config.media.clone())),
        }
    }
}

#[async_trait]
impl CropStrategy for TrackedCrop {
    async fn crop(&self, request: &CropRequest, control: &RunControl) -> Result<CropOutcome> {
        let info = request.info.clone();
        let plan = CropPlan::new(info.width, info.height, &request.session)?
            .with_expected_frames(info.frame_count);
        info!(
            "Tracked crop of {}: {}x{} -> {}x{}, initial window {}",
            request.input.display(),
            info.width,
            info.height,
            plan.output_width,
            plan.output_height,
            plan.initial_window
        );

        let intermediate = tempfile::Builder::new()
            .prefix("reframe-frames-")
            .suffix(&format!(".{}", self.media.intermediate_extension))
            .tempfile()?;

        let cropper = self.cropper.clone();
        let pipes = self.pipes.clone();
        let input = request.input.clone();
        let intermediate_path = intermediate.path().to_path_buf();
        let loop_control = control.clone();

        let report = tokio::task::spawn_blocking(move || -> Result<CropReport> {
            let mut reader = pipes.open_source(&input, &info)?;
            let mut writer =
                pipes.create_sink(&intermediate_path, plan.output_width, plan.output_height, &info)?;
            cropper.process(reader.as_mut(), writer.as_mut(), &plan, &loop_control)
        })
        .await
        .map_err(|e| ReframeError::frame_io(0, format!("Frame loop task failed: {}", e)))??;

        control.check(report.frames_written)?;

        let staged = staged_output(&request.output)?;
        let audio_source = (self.media.keep_audio && request.info.has_audio).then(|| request.input.clone());
        self.transcoder
            .encode(&EncodeJob {
                input: intermediate.path().to_path_buf(),
                audio_source,
                output: staged.path().to_path_buf(),
            })
            .await?;
        persist_output(staged, &request.output)?;
        drop(intermediate);

        Ok(CropOutcome {
            output: request.output.clone(),
            initial_window: plan.initial_window,
            output_width: plan.output_width,
            output_height: plan.output_height,
            report: Some(report),
        })
    }

    fn mode(&self) -> CropMode {
        CropMode::Tracked
    }
}

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{persist_output, staged_output, CropMode, CropOutcome, CropRequest, CropStrategy};
use crate::cancel::RunControl;
use crate::error::Result;
use crate::media::Transcoder;

/// Crops every frame with the same window in a single transcoder pass.
pub struct FixedWindowCrop {
    transcoder: Arc<dyn Transcoder>,
}

impl FixedWindowCrop {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }
}

#[async_trait]
impl CropStrategy for FixedWindowCrop {
    async fn crop(&self, request: &CropRequest, control: &RunControl) -> Result<CropOutcome> {
        let window = request
            .session
            .crop_box(request.info.width, request.info.height)?;
        info!(
            "Fixed crop {} of {}x{} ({} {:.2},{:.2} scale {:.2})",
            window,
            request.info.width,
            request.info.height,
            request.session.aspect_ratio,
            request.session.center_x,
            request.session.center_y,
            request.session.scale
        );

        control.check(0)?;
        let staged = staged_output(&request.output)?;
        self.transcoder
            .crop(&request.input, staged.path(), &window)
            .await?;
        control.check(0)?;
        persist_output(staged, &request.output)?;

        Ok(CropOutcome {
            output: request.output.clone(),
            initial_window: window,
            output_width: window.width,
            output_height: window.height,
            report: None,
        })
    }

    fn mode(&self) -> CropMode {
        CropMode::Fixed
    }
}

//! Still-frame preview of a crop window.

use image::{Rgb, RgbImage};
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::geometry::{BoundingBox, SessionConfig};
use crate::media::{Transcoder, VideoInfo};

/// Frame time used for previews, in seconds.
pub const PREVIEW_AT: f64 = 1.0;
const OUTLINE_THICKNESS: u32 = 3;
const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Draw a rectangle outline just inside `window`.
pub fn draw_outline(image: &mut RgbImage, window: &BoundingBox, thickness: u32, color: Rgb<u8>) {
    let window = window.clamp_to(image.width(), image.height());
    if window.is_empty() {
        return;
    }
    let thickness = thickness.min(window.width).min(window.height);

    for y in window.y..window.bottom() {
        for x in window.x..window.right() {
            let on_edge = x < window.x + thickness
                || x >= window.right() - thickness
                || y < window.y + thickness
                || y >= window.bottom() - thickness;
            if on_edge {
                image.put_pixel(x, y, color);
            }
        }
    }
}

/// Grab a representative frame, or a black canvas when that fails.
async fn preview_frame(transcoder: &dyn Transcoder, video: &Path, info: &VideoInfo) -> RgbImage {
    let at = if info.duration > 0.0 && info.duration <= PREVIEW_AT {
        0.0
    } else {
        PREVIEW_AT
    };

    let grabbed = async {
        let still = tempfile::Builder::new()
            .prefix("reframe-preview-")
            .suffix(".png")
            .tempfile()?;
        transcoder.extract_frame(video, at, still.path()).await?;
        Ok::<_, crate::error::ReframeError>(image::open(still.path())?.to_rgb8())
    }
    .await;

    match grabbed {
        Ok(frame) if frame.dimensions() == (info.width, info.height) => frame,
        Ok(frame) => image::imageops::resize(
            &frame,
            info.width,
            info.height,
            image::imageops::FilterType::Triangle,
        ),
        Err(e) => {
            warn!("Could not extract preview frame, using a blank canvas: {}", e);
            RgbImage::new(info.width, info.height)
        }
    }
}

/// Render the crop window of `session` over a frame of `video` into `output`.
///
/// The image format follows the output extension.
pub async fn render_preview(
    transcoder: &dyn Transcoder,
    video: &Path,
    info: &VideoInfo,
    session: &SessionConfig,
    output: &Path,
) -> Result<BoundingBox> {
    let window = session.crop_box(info.width, info.height)?;
    let mut frame = preview_frame(transcoder, video, info).await;

    draw_outline(&mut frame, &window, OUTLINE_THICKNESS, OUTLINE_COLOR);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    frame.save(output)?;

    info!("Preview with crop window {} written to {}", window, output.display());
    Ok(window)
}

//! Grayscale template tracker scored by normalized cross-correlation.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use tracing::trace;

use super::SubjectTracker;
use crate::config::TrackingConfig;
use crate::error::{ReframeError, Result};
use crate::geometry::BoundingBox;

/// Zero-mean template pixels at working resolution.
struct Template {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
    /// Sum of squared zero-mean pixels
    energy: f32,
}

/// Matches the subject's appearance at initialization against a window
/// around its previous position. The template is never refreshed.
pub struct TemplateTracker {
    search_margin: f64,
    min_match_score: f32,
    template_max_side: u32,
    template: Option<Template>,
    /// Working resolution relative to full frame
    scale: f64,
    last: BoundingBox,
    /// Frame size the template was taken from
    frame_size: (u32, u32),
}

impl TemplateTracker {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            search_margin: config.search_margin,
            min_match_score: config.min_match_score,
            template_max_side: config.template_max_side.max(1),
            template: None,
            scale: 1.0,
            last: BoundingBox::default(),
            frame_size: (0, 0),
        }
    }

    /// Search window around the last box, in full-frame space.
    fn search_window(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let margin_x = (self.last.width as f64 * self.search_margin).round() as u32;
        let margin_y = (self.last.height as f64 * self.search_margin).round() as u32;
        let x = self.last.x.saturating_sub(margin_x);
        let y = self.last.y.saturating_sub(margin_y);
        let right = (self.last.right() + margin_x).min(frame_width);
        let bottom = (self.last.bottom() + margin_y).min(frame_height);
        BoundingBox::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }
}

/// Grayscale of a frame region, resized by `scale`.
fn working_gray(frame: &RgbImage, region: &BoundingBox, scale: f64) -> GrayImage {
    let view = imageops::crop_imm(frame, region.x, region.y, region.width, region.height);
    let gray = imageops::grayscale(&*view);
    if scale == 1.0 {
        return gray;
    }
    let width = ((region.width as f64 * scale).round() as u32).max(1);
    let height = ((region.height as f64 * scale).round() as u32).max(1);
    imageops::resize(&gray, width, height, FilterType::Triangle)
}

fn build_template(gray: &GrayImage) -> Option<Template> {
    let count = (gray.width() * gray.height()) as f32;
    let mean = gray.pixels().map(|p| p[0] as f32).sum::<f32>() / count;
    let pixels: Vec<f32> = gray.pixels().map(|p| p[0] as f32 - mean).collect();
    let energy: f32 = pixels.iter().map(|v| v * v).sum();

    // A flat patch has no structure to match against
    if energy <= f32::EPSILON {
        return None;
    }
    Some(Template {
        width: gray.width(),
        height: gray.height(),
        pixels,
        energy,
    })
}

/// Best (score, x, y) of the template over every placement inside `search`.
fn best_match(search: &GrayImage, template: &Template) -> Option<(f32, u32, u32)> {
    if search.width() < template.width || search.height() < template.height {
        return None;
    }

    let stride = search.width() as usize;
    let raw = search.as_raw();
    let (tw, th) = (template.width as usize, template.height as usize);
    let count = (tw * th) as f32;

    let mut best: Option<(f32, u32, u32)> = None;
    for oy in 0..=(search.height() - template.height) as usize {
        for ox in 0..=(search.width() - template.width) as usize {
            let mut sum = 0.0f32;
            let mut sum_sq = 0.0f32;
            let mut cross = 0.0f32;
            for ty in 0..th {
                let row = (oy + ty) * stride + ox;
                let trow = ty * tw;
                for tx in 0..tw {
                    let p = raw[row + tx] as f32;
                    sum += p;
                    sum_sq += p * p;
                    cross += p * template.pixels[trow + tx];
                }
            }

            // Template is zero-mean, so the patch mean drops out of the cross term
            let patch_energy = sum_sq - sum * sum / count;
            let score = if patch_energy > f32::EPSILON {
                cross / (patch_energy * template.energy).sqrt()
            } else {
                0.0
            };

            if best.is_none_or(|(s, _, _)| score > s) {
                best = Some((score, ox as u32, oy as u32));
            }
        }
    }
    best
}

impl SubjectTracker for TemplateTracker {
    fn init(&mut self, frame: &RgbImage, bbox: BoundingBox) -> Result<bool> {
        let (frame_width, frame_height) = frame.dimensions();
        if bbox.is_empty() || !bbox.fits_within(frame_width, frame_height) {
            return Ok(false);
        }

        let longest = bbox.width.max(bbox.height);
        self.scale = (self.template_max_side as f64 / longest as f64).min(1.0);

        let gray = working_gray(frame, &bbox, self.scale);
        self.template = build_template(&gray);
        self.last = bbox;
        self.frame_size = (frame_width, frame_height);
        Ok(self.template.is_some())
    }

    fn update(&mut self, frame: &RgbImage) -> Result<Option<BoundingBox>> {
        let Some(template) = self.template.as_ref() else {
            return Ok(None);
        };

        let (frame_width, frame_height) = frame.dimensions();
        if (frame_width, frame_height) != self.frame_size {
            return Err(ReframeError::Tracker(format!(
                "Frame size changed from {}x{} to {}x{}",
                self.frame_size.0, self.frame_size.1, frame_width, frame_height
            )));
        }
        let window = self.search_window(frame_width, frame_height);
        if window.is_empty() {
            return Ok(None);
        }

        let search = working_gray(frame, &window, self.scale);
        let Some((score, mx, my)) = best_match(&search, template) else {
            return Ok(None);
        };
        trace!("Template match score {:.3} at ({}, {})", score, mx, my);

        if score < self.min_match_score {
            return Ok(None);
        }

        let x = window.x + (mx as f64 / self.scale).round() as u32;
        let y = window.y + (my as f64 / self.scale).round() as u32;
        let found = BoundingBox::new(x, y, self.last.width, self.last.height)
            .clamp_to(frame_width, frame_height);
        self.last = found;
        Ok(Some(found))
    }
}

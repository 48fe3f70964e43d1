//! Crop geometry: aspect ratios, pixel boxes, normalized windows and the
//! crop box calculator shared by every crop strategy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ReframeError, Result};

/// Output aspect ratios supported by the cropper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AspectRatio {
    /// 3:4 portrait
    Portrait3x4,
    /// 1:1 square
    Square,
    /// 9:16 vertical (shorts, reels)
    Vertical9x16,
    /// 4:5 portrait feed
    Portrait4x5,
    /// 16:9 landscape
    Landscape16x9,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Portrait3x4,
        AspectRatio::Square,
        AspectRatio::Vertical9x16,
        AspectRatio::Portrait4x5,
        AspectRatio::Landscape16x9,
    ];

    /// Width over height.
    pub fn ratio(&self) -> f64 {
        let (w, h) = self.terms();
        w as f64 / h as f64
    }

    pub fn terms(&self) -> (u32, u32) {
        match self {
            Self::Portrait3x4 => (3, 4),
            Self::Square => (1, 1),
            Self::Vertical9x16 => (9, 16),
            Self::Portrait4x5 => (4, 5),
            Self::Landscape16x9 => (16, 9),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portrait3x4 => "3:4",
            Self::Square => "1:1",
            Self::Vertical9x16 => "9:16",
            Self::Portrait4x5 => "4:5",
            Self::Landscape16x9 => "16:9",
        }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::Portrait3x4
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ReframeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|ratio| ratio.as_str() == trimmed)
            .ok_or_else(|| {
                let valid = Self::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ");
                ReframeError::invalid_input(format!(
                    "Unsupported aspect ratio '{}'. Valid ratios: {}",
                    s, valid
                ))
            })
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = ReframeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(value: AspectRatio) -> Self {
        value.as_str().to_string()
    }
}

/// Integer pixel rectangle.
///
/// The coordinate space (full frame or a search region) is implied by the
/// caller; use [`BoundingBox::offset_by`] to move a region-local box into
/// full-frame space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Center point in the box's own coordinate space.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Translate a region-local box into the space the region lives in.
    pub fn offset_by(&self, dx: u32, dy: u32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Whether the box lies entirely inside a `frame_width x frame_height` frame.
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.right() <= frame_width && self.bottom() <= frame_height
    }

    /// Shrink and shift the box so it lies inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Self {
        let width = self.width.min(frame_width);
        let height = self.height.min(frame_height);
        let x = self.x.min(frame_width - width);
        let y = self.y.min(frame_height - height);
        Self::new(x, y, width, height)
    }

    /// Place a `width x height` box centered on `(cx, cy)`, clamped into the frame.
    pub fn centered_at(
        cx: f64,
        cy: f64,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let width = width.min(frame_width);
        let height = height.min(frame_height);
        let x = clamp_axis(cx - width as f64 / 2.0, frame_width - width);
        let y = clamp_axis(cy - height as f64 / 2.0, frame_height - height);
        Self::new(x, y, width, height)
    }

    /// Intersection over union with another box in the same space.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        let intersection = x2.saturating_sub(x1) as u64 * y2.saturating_sub(y1) as u64;
        let union = self.area() + other.area() - intersection;

        if union > 0 {
            intersection as f64 / union as f64
        } else {
            0.0
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

fn clamp_axis(origin: f64, max_origin: u32) -> u32 {
    if origin <= 0.0 {
        0
    } else {
        (origin.floor() as u64).min(max_origin as u64) as u32
    }
}

/// Crop window in normalized `[0, 1]` frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropWindow {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropWindow {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Normalize a pixel box against the frame it was computed for.
    pub fn from_pixels(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Self {
        Self {
            x: bbox.x as f64 / frame_width as f64,
            y: bbox.y as f64 / frame_height as f64,
            width: bbox.width as f64 / frame_width as f64,
            height: bbox.height as f64 / frame_height as f64,
        }
    }

    /// Convert to pixels, rounding to the nearest pixel and clamping into the frame.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let width = ((self.width * frame_width as f64).round() as u32).clamp(1, frame_width);
        let height = ((self.height * frame_height as f64).round() as u32).clamp(1, frame_height);
        let x = ((self.x * frame_width as f64).round().max(0.0) as u32).min(frame_width - width);
        let y = ((self.y * frame_height as f64).round().max(0.0) as u32).min(frame_height - height);
        BoundingBox::new(x, y, width, height)
    }

    /// Pixel crop box with `aspect_ratio` enforced.
    ///
    /// A window whose shape disagrees with the ratio is shrunk around its own
    /// center. Dimensions are even, as the final encode requires.
    pub fn to_crop_box(
        &self,
        frame_width: u32,
        frame_height: u32,
        aspect_ratio: AspectRatio,
    ) -> Result<BoundingBox> {
        check_frame(frame_width, frame_height)?;
        self.validate()?;

        let bbox = self.to_pixels(frame_width, frame_height);
        let ratio = aspect_ratio.ratio();
        let (mut width, mut height) = (bbox.width, bbox.height);
        if (width as f64 - height as f64 * ratio).abs() > ratio_tolerance(ratio) {
            if width as f64 > height as f64 * ratio {
                width = ((height as f64 * ratio) as u32).max(1);
            } else {
                height = ((width as f64 / ratio) as u32).max(1);
            }
        }

        let (cx, cy) = bbox.center();
        Ok(BoundingBox::centered_at(
            cx,
            cy,
            make_even(width),
            make_even(height),
            frame_width,
            frame_height,
        ))
    }

    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x) && in_unit(self.y) && in_unit(self.width) && in_unit(self.height)) {
            return Err(ReframeError::invalid_input(format!(
                "Crop window components must lie in [0, 1]: {:?}",
                self
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(ReframeError::invalid_input("Crop window must have a positive size"));
        }
        Ok(())
    }
}

impl FromStr for CropWindow {
    type Err = ReframeError;

    /// Parse `x,y,width,height` in normalized units.
    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| ReframeError::invalid_input(format!("Crop window '{}' is not x,y,width,height", s)))?;
        let [x, y, width, height] = parts[..] else {
            return Err(ReframeError::invalid_input(format!(
                "Crop window '{}' needs exactly four values",
                s
            )));
        };
        let window = Self::new(x, y, width, height);
        window.validate()?;
        Ok(window)
    }
}

/// Caller-supplied crop parameters for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub aspect_ratio: AspectRatio,
    /// Horizontal center of the crop window, normalized
    pub center_x: f64,
    /// Vertical center of the crop window, normalized
    pub center_y: f64,
    /// Fraction of the limiting frame dimension covered by the window
    pub scale: f64,
    /// Explicit normalized window; replaces center and scale when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<CropWindow>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Portrait3x4,
            center_x: 0.5,
            center_y: 0.5,
            scale: 0.8,
            window: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.center_x) || !(0.0..=1.0).contains(&self.center_y) {
            return Err(ReframeError::invalid_input(format!(
                "Crop center must lie in [0, 1], got ({}, {})",
                self.center_x, self.center_y
            )));
        }
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(ReframeError::invalid_input(format!(
                "Crop scale must lie in (0, 1], got {}",
                self.scale
            )));
        }
        match &self.window {
            Some(window) => window.validate(),
            None => Ok(()),
        }
    }

    /// Pixel crop box for a frame of the given size.
    pub fn crop_box(&self, video_width: u32, video_height: u32) -> Result<BoundingBox> {
        match &self.window {
            Some(window) => window.to_crop_box(video_width, video_height, self.aspect_ratio),
            None => calculate_crop_box(
                video_width,
                video_height,
                self.aspect_ratio,
                self.center_x,
                self.center_y,
                self.scale,
            ),
        }
    }

    /// Normalized crop window for a frame of the given size.
    pub fn crop_window(&self, video_width: u32, video_height: u32) -> Result<CropWindow> {
        if let Some(window) = self.window {
            return Ok(window);
        }
        let bbox = self.crop_box(video_width, video_height)?;
        Ok(CropWindow::from_pixels(&bbox, video_width, video_height))
    }
}

/// Compute the crop box for a fixed aspect ratio.
///
/// The box is sized from the limiting frame dimension times `scale`, centered
/// on `(center_x * video_width, center_y * video_height)` and clamped so it never
/// leaves the frame. Dimensions are truncated to whole, even pixel counts.
pub fn calculate_crop_box(
    video_width: u32,
    video_height: u32,
    aspect_ratio: AspectRatio,
    center_x: f64,
    center_y: f64,
    scale: f64,
) -> Result<BoundingBox> {
    check_frame(video_width, video_height)?;
    SessionConfig {
        aspect_ratio,
        center_x,
        center_y,
        scale,
        window: None,
    }
    .validate()?;

    let target_ratio = aspect_ratio.ratio();
    let (w, h) = (video_width as f64, video_height as f64);

    let by_width = || {
        let crop_width = make_even(((w * scale) as u32).max(1));
        let crop_height = make_even(((crop_width as f64 / target_ratio) as u32).max(1));
        (crop_width, crop_height)
    };
    let by_height = || {
        let crop_height = make_even(((h * scale) as u32).max(1));
        let crop_width = make_even(((crop_height as f64 * target_ratio) as u32).max(1));
        (crop_width, crop_height)
    };

    let (mut crop_width, mut crop_height) = if w * target_ratio <= h {
        by_width()
    } else {
        by_height()
    };

    // The primary sizing can overshoot for some ratio/frame combinations;
    // the other limiting dimension always fits.
    if crop_width > video_width || crop_height > video_height {
        (crop_width, crop_height) = if crop_width > video_width {
            by_width()
        } else {
            by_height()
        };
    }

    Ok(BoundingBox::centered_at(
        center_x * w,
        center_y * h,
        make_even(crop_width.min(video_width)),
        make_even(crop_height.min(video_height)),
        video_width,
        video_height,
    ))
}

fn check_frame(video_width: u32, video_height: u32) -> Result<()> {
    if video_width == 0 || video_height == 0 {
        return Err(ReframeError::invalid_input(format!(
            "Video dimensions must be positive, got {}x{}",
            video_width, video_height
        )));
    }
    Ok(())
}

/// Round down to an even pixel count; yuv420p output needs even sizes.
pub fn make_even(value: u32) -> u32 {
    if value >= 2 { value & !1 } else { value }
}

/// Largest `width - height * ratio` gap left by whole, even pixel sizes.
fn ratio_tolerance(ratio: f64) -> f64 {
    2.0 * ratio.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_square_crop_on_full_hd() {
        let bbox = calculate_crop_box(1920, 1080, AspectRatio::Square, 0.5, 0.5, 0.8).unwrap();
        assert_eq!(bbox, BoundingBox::new(528, 108, 864, 864));
    }

    #[test]
    fn test_portrait_crop_on_landscape_source() {
        let bbox = calculate_crop_box(1920, 1080, AspectRatio::Portrait3x4, 0.5, 0.5, 1.0).unwrap();
        assert_eq!(bbox.height, 1080);
        assert_eq!(bbox.width, 810);
        assert_eq!(bbox.x, 555);
        assert_eq!(bbox.y, 0);
    }

    #[test]
    fn test_odd_sizes_are_rounded_down_to_even() {
        // 540 * 0.75 = 405 would be rejected by libx264 with yuv420p
        let bbox = calculate_crop_box(1920, 1080, AspectRatio::Portrait3x4, 0.5, 0.5, 0.5).unwrap();
        assert_eq!(bbox, BoundingBox::new(758, 270, 404, 540));
    }

    #[test]
    fn test_explicit_window_enforces_ratio() {
        // 0.5 x 0.5 of 1920x1080 is 960x540; 1:1 keeps the height and recenters
        let window = CropWindow::new(0.25, 0.25, 0.5, 0.5);
        let bbox = window.to_crop_box(1920, 1080, AspectRatio::Square).unwrap();
        assert_eq!(bbox, BoundingBox::new(690, 270, 540, 540));

        let session = SessionConfig {
            aspect_ratio: AspectRatio::Square,
            window: Some(window),
            ..SessionConfig::default()
        };
        assert_eq!(session.crop_box(1920, 1080).unwrap(), bbox);
        assert_eq!(session.crop_window(1920, 1080).unwrap(), window);

        let outside = CropWindow::new(0.8, 0.0, 0.4, 0.5);
        assert!(outside.to_crop_box(1920, 1080, AspectRatio::Square).is_ok());
        assert!(CropWindow::new(0.0, 0.0, 1.5, 0.5)
            .to_crop_box(1920, 1080, AspectRatio::Square)
            .is_err());
    }

    #[test]
    fn test_crop_window_parsing() {
        let window: CropWindow = "0.1, 0.2,0.5,0.6".parse().unwrap();
        assert_eq!(window, CropWindow::new(0.1, 0.2, 0.5, 0.6));
        assert!("0.1,0.2,0.5".parse::<CropWindow>().is_err());
        assert!("0.1,0.2,0.5,x".parse::<CropWindow>().is_err());
        assert!("0.1,0.2,0.0,0.5".parse::<CropWindow>().is_err());
    }

    #[test]
    fn test_session_window_round_trips_to_same_box() {
        let session = SessionConfig {
            aspect_ratio: AspectRatio::Portrait3x4,
            center_x: 0.3,
            center_y: 0.6,
            scale: 0.5,
            window: None,
        };
        let bbox = session.crop_box(1920, 1080).unwrap();
        let window = session.crop_window(1920, 1080).unwrap();
        assert_eq!(
            window.to_crop_box(1920, 1080, AspectRatio::Portrait3x4).unwrap(),
            bbox
        );
    }

    #[test]
    fn test_crop_is_clamped_at_edges() {
        let left = calculate_crop_box(1920, 1080, AspectRatio::Square, 0.0, 0.0, 0.5).unwrap();
        assert_eq!((left.x, left.y), (0, 0));

        let right = calculate_crop_box(1920, 1080, AspectRatio::Square, 1.0, 1.0, 0.5).unwrap();
        assert_eq!(right.right(), 1920);
        assert_eq!(right.bottom(), 1080);
    }

    #[test]
    fn test_landscape_ratio_on_square_source_falls_back() {
        let bbox = calculate_crop_box(1000, 1000, AspectRatio::Landscape16x9, 0.5, 0.5, 1.0).unwrap();
        assert!(bbox.fits_within(1000, 1000));
        assert_eq!(bbox.width, 1000);
        assert_eq!(bbox.height, 562);
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        assert!(calculate_crop_box(0, 1080, AspectRatio::Square, 0.5, 0.5, 0.8).is_err());
        assert!(calculate_crop_box(1920, 1080, AspectRatio::Square, 1.5, 0.5, 0.8).is_err());
        assert!(calculate_crop_box(1920, 1080, AspectRatio::Square, 0.5, 0.5, 0.0).is_err());
        assert!(calculate_crop_box(1920, 1080, AspectRatio::Square, 0.5, 0.5, 1.2).is_err());
    }

    #[test]
    fn test_aspect_ratio_parsing() {
        assert_eq!("9:16".parse::<AspectRatio>().unwrap(), AspectRatio::Vertical9x16);
        assert_eq!(" 1:1 ".parse::<AspectRatio>().unwrap(), AspectRatio::Square);
        assert!("2:3".parse::<AspectRatio>().is_err());
        assert_eq!(AspectRatio::Portrait4x5.to_string(), "4:5");
    }

    #[test]
    fn test_window_round_trip_through_pixels() {
        let bbox = BoundingBox::new(528, 108, 864, 864);
        let window = CropWindow::from_pixels(&bbox, 1920, 1080);
        assert_eq!(window.to_pixels(1920, 1080), bbox);
    }

    #[test]
    fn test_offset_and_clamp() {
        let local = BoundingBox::new(10, 20, 100, 200);
        assert_eq!(local.offset_by(500, 40), BoundingBox::new(510, 60, 100, 200));

        let overflowing = BoundingBox::new(1900, 1000, 100, 200);
        let clamped = overflowing.clamp_to(1920, 1080);
        assert!(clamped.fits_within(1920, 1080));
        assert_eq!((clamped.width, clamped.height), (100, 200));
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
        assert_eq!(a.iou(&BoundingBox::new(20, 20, 5, 5)), 0.0);
    }

    fn any_ratio() -> impl Strategy<Value = AspectRatio> {
        prop::sample::select(AspectRatio::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn crop_box_stays_in_frame_and_keeps_ratio(
            width in 64u32..4096,
            height in 64u32..4096,
            ratio in any_ratio(),
            cx in 0.0f64..=1.0,
            cy in 0.0f64..=1.0,
            scale in 0.1f64..=1.0,
        ) {
            let bbox = calculate_crop_box(width, height, ratio, cx, cy, scale).unwrap();
            prop_assert!(bbox.fits_within(width, height));
            prop_assert!(!bbox.is_empty());
            prop_assert!(bbox.width % 2 == 0 && bbox.height % 2 == 0, "odd size {}", bbox);

            let r = ratio.ratio();
            let drift = (bbox.width as f64 - bbox.height as f64 * r).abs();
            prop_assert!(drift <= ratio_tolerance(r) + 1e-9, "drift {} for {}", drift, bbox);
        }

        #[test]
        fn session_box_survives_normalization(
            width in 64u32..4096,
            height in 64u32..4096,
            ratio in any_ratio(),
            cx in 0.0f64..=1.0,
            cy in 0.0f64..=1.0,
            scale in 0.1f64..=1.0,
        ) {
            let bbox = calculate_crop_box(width, height, ratio, cx, cy, scale).unwrap();
            let window = CropWindow::from_pixels(&bbox, width, height);
            prop_assert_eq!(window.to_crop_box(width, height, ratio).unwrap(), bbox);
        }

        #[test]
        fn crop_box_is_deterministic(
            width in 16u32..4096,
            height in 16u32..4096,
            ratio in any_ratio(),
            cx in 0.0f64..=1.0,
            cy in 0.0f64..=1.0,
            scale in 0.1f64..=1.0,
        ) {
            let first = calculate_crop_box(width, height, ratio, cx, cy, scale).unwrap();
            let second = calculate_crop_box(width, height, ratio, cx, cy, scale).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}

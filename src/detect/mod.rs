//! Subject detection.
//!
//! [`ObjectDetector`] is the raw capability (a model returning scored boxes);
//! [`SubjectDetector`] narrows it to "where is the subject in this region",
//! handling working resolution, class selection and failure recovery.

pub mod yolo;

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::geometry::BoundingBox;

pub use yolo::YoloDetector;

/// COCO class id of a person.
pub const PERSON_CLASS: usize = 0;

/// One scored box, in the pixel space of the image that was analyzed.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Object detection capability.
pub trait ObjectDetector: Send + Sync {
    /// Detect objects in `image`. Boxes are in `image` pixel coordinates.
    fn detect_objects(&self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// Finds the most confident subject inside a region of a frame.
#[derive(Clone)]
pub struct SubjectDetector {
    detector: Arc<dyn ObjectDetector>,
    subject_class: usize,
    working_max_side: u32,
}

impl SubjectDetector {
    pub fn new(detector: Arc<dyn ObjectDetector>, subject_class: usize, working_max_side: u32) -> Self {
        Self {
            detector,
            subject_class,
            working_max_side: working_max_side.max(1),
        }
    }

    pub fn from_config(detector: Arc<dyn ObjectDetector>, config: &DetectionConfig) -> Self {
        Self::new(detector, config.subject_class, config.working_max_side)
    }

    /// Locate the subject in `region`, in region-local coordinates.
    ///
    /// Returns `None` when nothing is found or when the capability fails.
    pub fn detect(&self, region: &RgbImage) -> Option<BoundingBox> {
        let (width, height) = region.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let longest = width.max(height);
        let downscaled;
        let (working, factor) = if longest > self.working_max_side {
            let factor = self.working_max_side as f64 / longest as f64;
            let w = ((width as f64 * factor).round() as u32).max(1);
            let h = ((height as f64 * factor).round() as u32).max(1);
            downscaled = imageops::resize(region, w, h, FilterType::Triangle);
            (&downscaled, w as f64 / width as f64)
        } else {
            (region, 1.0)
        };

        let detections = match self.detector.detect_objects(working) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Subject detection failed: {}", e);
                return None;
            }
        };

        let best = detections
            .into_iter()
            .filter(|d| d.class_id == self.subject_class && !d.bbox.is_empty())
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

        let bbox = scale_box(&best.bbox, 1.0 / factor).clamp_to(width, height);
        if bbox.is_empty() {
            return None;
        }

        debug!("Subject at {} (confidence {:.2})", bbox, best.confidence);
        Some(bbox)
    }
}

fn scale_box(bbox: &BoundingBox, factor: f64) -> BoundingBox {
    if factor == 1.0 {
        return *bbox;
    }
    let x = (bbox.x as f64 * factor).round() as u32;
    let y = (bbox.y as f64 * factor).round() as u32;
    let right = (bbox.right() as f64 * factor).round() as u32;
    let bottom = (bbox.bottom() as f64 * factor).round() as u32;
    BoundingBox::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::ReframeError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns scripted results in order, then repeats the fallback.
    pub struct ScriptedDetector {
        script: Mutex<VecDeque<Result<Vec<Detection>>>>,
        fallback: Vec<Detection>,
        pub seen_sizes: Mutex<Vec<(u32, u32)>>,
    }

    impl ScriptedDetector {
        pub fn new(script: Vec<Result<Vec<Detection>>>, fallback: Vec<Detection>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                seen_sizes: Mutex::new(Vec::new()),
            }
        }

        pub fn never() -> Self {
            Self::new(Vec::new(), Vec::new())
        }

        pub fn always(bbox: BoundingBox) -> Self {
            Self::new(Vec::new(), vec![person(bbox, 0.9)])
        }

        pub fn failing() -> Self {
            Self::new(vec![Err(ReframeError::Detection("model exploded".to_string()))], Vec::new())
        }
    }

    impl ObjectDetector for ScriptedDetector {
        fn detect_objects(&self, image: &RgbImage) -> Result<Vec<Detection>> {
            self.seen_sizes.lock().unwrap().push(image.dimensions());
            match self.script.lock().unwrap().pop_front() {
                Some(result) => result,
                None => Ok(self.fallback.clone()),
            }
        }
    }

    pub fn person(bbox: BoundingBox, confidence: f32) -> Detection {
        Detection {
            bbox,
            confidence,
            class_id: PERSON_CLASS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_picks_most_confident_subject() {
        let detector = ScriptedDetector::new(
            vec![Ok(vec![
                person(BoundingBox::new(0, 0, 10, 10), 0.4),
                person(BoundingBox::new(20, 20, 10, 10), 0.8),
                Detection {
                    bbox: BoundingBox::new(40, 40, 10, 10),
                    confidence: 0.99,
                    class_id: 2,
                },
            ])],
            Vec::new(),
        );
        let subject = SubjectDetector::new(Arc::new(detector), PERSON_CLASS, 640);

        let found = subject.detect(&RgbImage::new(100, 100));
        assert_eq!(found, Some(BoundingBox::new(20, 20, 10, 10)));
    }

    #[test]
    fn test_nothing_found_is_none() {
        let subject = SubjectDetector::new(Arc::new(ScriptedDetector::never()), PERSON_CLASS, 640);
        assert_eq!(subject.detect(&RgbImage::new(50, 50)), None);
    }

    #[test]
    fn test_capability_error_is_recovered() {
        let subject = SubjectDetector::new(Arc::new(ScriptedDetector::failing()), PERSON_CLASS, 640);
        assert_eq!(subject.detect(&RgbImage::new(50, 50)), None);
    }

    #[test]
    fn test_downscales_and_maps_back() {
        let detector = Arc::new(ScriptedDetector::always(BoundingBox::new(100, 50, 200, 100)));
        let subject = SubjectDetector::new(detector.clone(), PERSON_CLASS, 640);

        let found = subject.detect(&RgbImage::new(1280, 720)).unwrap();
        assert_eq!(detector.seen_sizes.lock().unwrap()[0], (640, 360));
        assert_eq!(found, BoundingBox::new(200, 100, 400, 200));
    }

    #[test]
    fn test_result_is_clamped_to_region() {
        let detector = ScriptedDetector::always(BoundingBox::new(80, 80, 50, 50));
        let subject = SubjectDetector::new(Arc::new(detector), PERSON_CLASS, 640);

        let found = subject.detect(&RgbImage::new(100, 100)).unwrap();
        assert!(found.fits_within(100, 100));
    }
}

//! YOLOv8 person detection through ONNX Runtime.

use std::path::Path;
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use super::{Detection, ObjectDetector};
use crate::config::DetectionConfig;
use crate::error::{ReframeError, Result};
use crate::geometry::BoundingBox;

/// Box attributes (cx, cy, w, h) ahead of the class scores in each column.
const BOX_FEATURES: usize = 4;
const LETTERBOX_FILL: u8 = 114;

/// How a frame was fit into the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    orig_width: u32,
    orig_height: u32,
}

impl Letterbox {
    fn new(orig_width: u32, orig_height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / orig_width as f32).min(input_size as f32 / orig_height as f32);
        let new_w = ((orig_width as f32 * scale).round() as u32).clamp(1, input_size);
        let new_h = ((orig_height as f32 * scale).round() as u32).clamp(1, input_size);
        Self {
            scale,
            pad_x: ((input_size - new_w) / 2) as f32,
            pad_y: ((input_size - new_h) / 2) as f32,
            orig_width,
            orig_height,
        }
    }

    fn resized_size(&self) -> (u32, u32) {
        (
            ((self.orig_width as f32 * self.scale).round() as u32).max(1),
            ((self.orig_height as f32 * self.scale).round() as u32).max(1),
        )
    }

    /// Map a model-space center box back to a clamped box in the original image.
    fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let x1 = ((cx - w / 2.0 - self.pad_x) / self.scale).clamp(0.0, self.orig_width as f32);
        let y1 = ((cy - h / 2.0 - self.pad_y) / self.scale).clamp(0.0, self.orig_height as f32);
        let x2 = ((cx + w / 2.0 - self.pad_x) / self.scale).clamp(0.0, self.orig_width as f32);
        let y2 = ((cy + h / 2.0 - self.pad_y) / self.scale).clamp(0.0, self.orig_height as f32);

        let x = x1.round() as u32;
        let y = y1.round() as u32;
        BoundingBox::new(
            x,
            y,
            (x2.round() as u32).saturating_sub(x),
            (y2.round() as u32).saturating_sub(y),
        )
    }
}

/// YOLOv8 detector. The ONNX session is loaded once and shared.
pub struct YoloDetector {
    session: Mutex<Session>,
    config: DetectionConfig,
}

impl YoloDetector {
    /// Load the model named in the config.
    ///
    /// Fails with [`ReframeError::Model`] if the file is missing or not a usable model.
    pub fn load(config: &DetectionConfig) -> Result<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(ReframeError::Model(format!(
                "Model file not found: {}",
                config.model_path
            )));
        }

        let session = Mutex::new(create_session(model_path)?);
        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            "Subject detector initialized"
        );

        Ok(Self {
            session,
            config: config.clone(),
        })
    }

    /// Letterbox into the square model input, normalized CHW.
    fn preprocess(&self, image: &RgbImage) -> Result<(Value, Letterbox)> {
        let size = self.config.input_size;
        let letterbox = Letterbox::new(image.width(), image.height(), size);
        let (new_w, new_h) = letterbox.resized_size();

        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
        imageops::replace(&mut canvas, &resized, letterbox.pad_x as i64, letterbox.pad_y as i64);

        let side = size as usize;
        let mut chw: Vec<f32> = vec![0.0; 3 * side * side];
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let offset = y as usize * side + x as usize;
            for c in 0..3 {
                chw[c * side * side + offset] = pixel[c] as f32 / 255.0;
            }
        }

        let shape = vec![1usize, 3, side, side];
        let tensor = Tensor::from_array((shape, chw.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| ReframeError::Detection(format!("Failed to create tensor: {}", e)))?;
        Ok((tensor, letterbox))
    }

    fn run_inference(&self, input: Value) -> Result<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| ReframeError::Detection("Session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ReframeError::Detection(format!("ONNX inference failed: {}", e)))?;

        // [1, 84, N]
        let output = outputs
            .get("output0")
            .ok_or_else(|| ReframeError::Detection("Missing output0 tensor".to_string()))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ReframeError::Detection(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }
}

impl ObjectDetector for YoloDetector {
    fn detect_objects(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = self.preprocess(image)?;
        let outputs = self.run_inference(input)?;
        let candidates = decode_output(
            &outputs,
            &letterbox,
            self.config.subject_class,
            self.config.confidence_threshold,
        )?;
        let detections = non_maximum_suppression(candidates, self.config.nms_threshold);

        debug!("{} subject candidate(s) after NMS", detections.len());
        Ok(detections)
    }
}

/// Decode YOLOv8 output `[84, N]` (4 box values + 80 class scores per column),
/// keeping boxes whose best class is `class_id` and beats `threshold`.
fn decode_output(
    outputs: &[f32],
    letterbox: &Letterbox,
    class_id: usize,
    threshold: f32,
) -> Result<Vec<Detection>> {
    let num_features = BOX_FEATURES + 80;
    if outputs.is_empty() || outputs.len() % num_features != 0 {
        return Err(ReframeError::Detection(format!(
            "Unexpected output size {} (not a multiple of {})",
            outputs.len(),
            num_features
        )));
    }
    let num_boxes = outputs.len() / num_features;

    let output_array = Array::from_shape_vec((num_features, num_boxes), outputs.to_vec())
        .map_err(|e| ReframeError::Detection(format!("Failed to reshape output: {}", e)))?;
    let rows = output_array.t();

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let (best_class, best_score) = (0..num_features - BOX_FEATURES)
            .map(|c| (c, rows[[i, BOX_FEATURES + c]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if best_class != class_id || best_score < threshold {
            continue;
        }

        let bbox = letterbox.unmap(rows[[i, 0]], rows[[i, 1]], rows[[i, 2]], rows[[i, 3]]);
        if bbox.is_empty() {
            continue;
        }
        candidates.push(Detection {
            bbox,
            confidence: best_score,
            class_id: best_class,
        });
    }

    Ok(candidates)
}

/// Greedy per-class non-maximum suppression.
fn non_maximum_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections {
        let overlaps = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id
                && kept.bbox.iou(&candidate.bbox) > iou_threshold as f64
        });
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}

fn create_session(model_path: &Path) -> Result<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| ReframeError::Model(format!("Failed to read model file: {}", e)))?;

    Session::builder()
        .map_err(|e| ReframeError::Model(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| ReframeError::Model(format!("Failed to set optimization level: {}", e)))?
        .commit_from_memory(&model_bytes)
        .map_err(|e| ReframeError::Model(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Column-major [84, N] buffer with the given (cx, cy, w, h, class, score) columns.
    fn raw_output(columns: &[(f32, f32, f32, f32, usize, f32)]) -> Vec<f32> {
        let n = columns.len();
        let mut data = vec![0.0; 84 * n];
        for (i, &(cx, cy, w, h, class, score)) in columns.iter().enumerate() {
            data[i] = cx;
            data[n + i] = cy;
            data[2 * n + i] = w;
            data[3 * n + i] = h;
            data[(4 + class) * n + i] = score;
        }
        data
    }

    #[test]
    fn test_letterbox_geometry() {
        let lb = Letterbox::new(1280, 720, 640);
        assert_eq!(lb.resized_size(), (640, 360));
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);

        // Model-space box centered on the padded image maps back to frame center
        let bbox = lb.unmap(320.0, 320.0, 100.0, 50.0);
        assert_eq!(bbox, BoundingBox::new(540, 310, 200, 100));
    }

    #[test]
    fn test_decode_filters_class_and_threshold() {
        let lb = Letterbox::new(640, 640, 640);
        let outputs = raw_output(&[
            (100.0, 100.0, 40.0, 80.0, 0, 0.9),
            (300.0, 300.0, 40.0, 80.0, 0, 0.1),
            (500.0, 500.0, 40.0, 80.0, 2, 0.95),
        ]);

        let detections = decode_output(&outputs, &lb, 0, 0.25).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(80, 60, 40, 80));
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_malformed_output() {
        let lb = Letterbox::new(640, 640, 640);
        assert!(decode_output(&[0.0; 10], &lb, 0, 0.25).is_err());
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let det = |x, confidence| Detection {
            bbox: BoundingBox::new(x, 0, 100, 100),
            confidence,
            class_id: 0,
        };
        let kept = non_maximum_suppression(vec![det(0, 0.5), det(5, 0.9), det(300, 0.7)], 0.45);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].bbox.x, 5);
        assert_eq!(kept[1].bbox.x, 300);
    }

    #[test]
    fn test_missing_model_file() {
        let config = DetectionConfig {
            model_path: "/nonexistent/model.onnx".to_string(),
            ..DetectionConfig::default()
        };
        assert!(matches!(YoloDetector::load(&config), Err(ReframeError::Model(_))));
    }
}

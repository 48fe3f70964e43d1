use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{Result, ReframeError};
use crate::geometry::SessionConfig;

// Defaults for keys that older config files may not carry
fn default_init_retry_interval() -> u32 {
    1
}

fn default_keep_audio() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub media: MediaConfig,
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    /// Default crop parameters, overridable per invocation
    #[serde(default)]
    pub crop: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary
    pub probe_path: String,
    /// Final video codec
    pub video_codec: String,
    /// Final audio codec
    pub audio_codec: String,
    /// Encoder speed preset (ultrafast, fast, medium, slow, veryslow)
    pub preset: String,
    /// Constant rate factor (0-51, lower = better quality)
    pub crf: u8,
    /// Pixel format of the final output
    pub pixel_format: String,
    /// Carry the source audio track into tracked crops
    #[serde(default = "default_keep_audio")]
    pub keep_audio: bool,
    /// Codec of the intermediate frame file written during tracking
    pub intermediate_codec: String,
    /// Container extension of the intermediate frame file
    pub intermediate_extension: String,
    /// `-q:v` value for the intermediate codec
    pub intermediate_quality: u8,
    /// Additional options appended to every final encode
    pub extra_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Path to a YOLOv8-format ONNX model
    pub model_path: String,
    /// Minimum class score for a candidate detection
    pub confidence_threshold: f32,
    /// IoU threshold for non-maximum suppression
    pub nms_threshold: f32,
    /// Square model input size in pixels
    pub input_size: u32,
    /// COCO class treated as the subject (0 = person)
    pub subject_class: usize,
    /// Longest side a region is downscaled to before detection
    pub working_max_side: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Search window margin around the last box, as a fraction of its size
    pub search_margin: f64,
    /// Minimum normalized cross-correlation for a successful update
    pub min_match_score: f32,
    /// Longest template side after downscaling
    pub template_max_side: u32,
    /// Consecutive lost frames after which re-detection stops (unbounded if absent)
    #[serde(default)]
    pub max_lost_frames: Option<u32>,
    /// Frames between detection retries while no subject has been found
    #[serde(default = "default_init_retry_interval")]
    pub init_retry_interval: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            probe_path: "ffprobe".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "ultrafast".to_string(),
            crf: 23,
            pixel_format: "yuv420p".to_string(),
            keep_audio: true,
            intermediate_codec: "mjpeg".to_string(),
            intermediate_extension: "avi".to_string(),
            intermediate_quality: 2,
            extra_options: vec![
                // Example options users can add:
                // "-movflags".to_string(), "+faststart".to_string(),
            ],
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            input_size: 640,
            subject_class: 0,
            working_max_side: 640,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            search_margin: 0.5,
            min_match_score: 0.6,
            template_max_side: 48,
            max_lost_frames: None,
            init_retry_interval: 1,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReframeError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ReframeError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ReframeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ReframeError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.media.crf > 51 {
            return Err(ReframeError::Config(format!("crf must be 0-51, got {}", self.media.crf)));
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ReframeError::Config("confidence_threshold must lie in [0, 1]".to_string()));
        }
        if self.detection.input_size == 0 || self.detection.working_max_side == 0 {
            return Err(ReframeError::Config("detection sizes must be positive".to_string()));
        }
        if self.tracking.search_margin < 0.0 {
            return Err(ReframeError::Config("search_margin must not be negative".to_string()));
        }
        if self.tracking.template_max_side < 4 {
            return Err(ReframeError::Config("template_max_side must be at least 4".to_string()));
        }
        if self.tracking.init_retry_interval == 0 {
            return Err(ReframeError::Config("init_retry_interval must be at least 1".to_string()));
        }
        self.crop
            .validate()
            .map_err(|e| ReframeError::Config(format!("[crop] {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::AspectRatio;
    use assert_fs::prelude::*;

    #[test]
    fn test_default_config_round_trips() {
        let dir = assert_fs::TempDir::new().unwrap();
        let path = dir.child("reframe.toml");

        let mut config = Config::default();
        config.crop.aspect_ratio = AspectRatio::Vertical9x16;
        config.tracking.max_lost_frames = Some(90);
        config.save_to_file(path.path()).unwrap();

        let written = std::fs::read_to_string(path.path()).unwrap();
        assert!(written.contains("aspect_ratio = \"9:16\""));

        let loaded = Config::from_file(path.path()).unwrap();
        assert_eq!(loaded.crop.aspect_ratio, AspectRatio::Vertical9x16);
        assert_eq!(loaded.tracking.max_lost_frames, Some(90));
        assert_eq!(loaded.media.crf, 23);
    }

    #[test]
    fn test_optional_keys_fall_back_to_defaults() {
        let dir = assert_fs::TempDir::new().unwrap();
        let path = dir.child("reframe.toml");
        let mut text = toml::to_string_pretty(&Config::default()).unwrap();
        text = text
            .lines()
            .filter(|line| !line.starts_with("init_retry_interval") && !line.starts_with("keep_audio"))
            .collect::<Vec<_>>()
            .join("\n");
        path.write_str(&text).unwrap();

        let loaded = Config::from_file(path.path()).unwrap();
        assert_eq!(loaded.tracking.init_retry_interval, 1);
        assert!(loaded.media.keep_audio);
        assert_eq!(loaded.tracking.max_lost_frames, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = assert_fs::TempDir::new().unwrap();
        let path = dir.child("reframe.toml");
        let mut config = Config::default();
        config.crop.scale = 0.0;
        config.save_to_file(path.path()).unwrap();
        assert!(matches!(Config::from_file(path.path()), Err(ReframeError::Config(_))));

        path.write_str("[media]\nbinary_path = 3").unwrap();
        assert!(Config::from_file(path.path()).is_err());
    }
}

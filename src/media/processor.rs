use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{Result, ReframeError};
use crate::geometry::BoundingBox;
use super::{EncodeJob, EncodeSettings, MediaCommandBuilder, Transcoder};

/// Concrete implementation of the transcoder (FFmpeg-based)
pub struct FfmpegTranscoder {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegTranscoder {
    /// Create a new ffmpeg transcoder
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);

        Self {
            config,
            command_builder,
        }
    }

    /// Encode settings derived from the media configuration
    pub fn settings(&self) -> EncodeSettings {
        EncodeSettings {
            video_codec: self.config.video_codec.clone(),
            audio_codec: self.config.audio_codec.clone(),
            preset: self.config.preset.clone(),
            crf: self.config.crf,
            pixel_format: self.config.pixel_format.clone(),
            extra_options: self.config.extra_options.clone(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn encode(&self, job: &EncodeJob) -> Result<()> {
        info!("Encoding {} -> {}", job.input.display(), job.output.display());

        let command = self.command_builder.encode(
            job.input.as_path(),
            job.audio_source.as_deref(),
            job.output.as_path(),
            &self.settings(),
        );
        command.execute().await?;

        info!("Encoding completed");
        Ok(())
    }

    async fn crop(&self, input: &Path, output: &Path, window: &BoundingBox) -> Result<()> {
        info!("Cropping {} to {} -> {}", input.display(), window, output.display());

        let command = self.command_builder.crop(input, output, window, &self.settings());
        command.execute().await?;

        info!("Crop completed");
        Ok(())
    }

    async fn trim(&self, input: &Path, output: &Path, start: f64, duration: f64) -> Result<()> {
        info!(
            "Trimming {} ({:.3}s from {:.3}s) -> {}",
            input.display(),
            duration,
            start,
            output.display()
        );

        let command = self
            .command_builder
            .trim(input, output, start, duration, &self.settings());
        command.execute().await?;

        info!("Trim completed");
        Ok(())
    }

    async fn extract_frame(&self, input: &Path, at_seconds: f64, output: &Path) -> Result<()> {
        debug!("Extracting frame at {:.3}s from {}", at_seconds, input.display());

        let command = self.command_builder.extract_frame(input, at_seconds, output);
        command.execute().await?;

        if !output.exists() {
            return Err(ReframeError::encode_failed(
                format!("No frame written at {:.3}s", at_seconds),
                None,
            ));
        }
        Ok(())
    }

    fn check_availability(&self) -> Result<()> {
        for binary in [&self.config.binary_path, &self.config.probe_path] {
            which::which(binary).map_err(|e| {
                ReframeError::Config(format!("{} not found: {}", binary, e))
            })?;
        }
        info!("Media processor is available");
        Ok(())
    }

    async fn version(&self) -> Result<String> {
        debug!("Getting media processor version information");

        let command = self.command_builder.version_check();
        let output = Command::new(&command.binary_path)
            .args(&command.args)
            .output()
            .await
            .map_err(|e| ReframeError::encode_failed(format!("Failed to execute media processor: {}", e), None))?;

        if output.status.success() {
            let version_info = String::from_utf8_lossy(&output.stdout);
            // First line carries the version
            let first_line = version_info.lines().next().unwrap_or("Unknown version");
            Ok(first_line.to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(ReframeError::encode_failed("Media processor version check failed", Some(stderr)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_follow_config() {
        let config = MediaConfig {
            preset: "medium".to_string(),
            crf: 18,
            extra_options: vec!["-tune".to_string(), "film".to_string()],
            ..MediaConfig::default()
        };
        let transcoder = FfmpegTranscoder::new(config);
        let settings = transcoder.settings();

        assert_eq!(settings.preset, "medium");
        assert_eq!(settings.crf, 18);
        assert_eq!(settings.video_codec, "libx264");
        assert_eq!(settings.extra_options, vec!["-tune", "film"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let config = MediaConfig {
            binary_path: "definitely-not-ffmpeg-binary".to_string(),
            ..MediaConfig::default()
        };
        let transcoder = FfmpegTranscoder::new(config);

        assert!(transcoder.check_availability().is_err());
        let err = transcoder
            .crop(Path::new("in.mp4"), Path::new("out.mp4"), &BoundingBox::new(0, 0, 2, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, ReframeError::Encode { .. }));
    }
}

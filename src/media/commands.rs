use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ReframeError};
use crate::geometry::BoundingBox;
use crate::timecode::format_ffmpeg_time;

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Only report errors on stderr
    pub fn quiet(self) -> Self {
        self.arg("-hide_banner").arg("-loglevel").arg("error")
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Disable audio
    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Select a stream for the output
    pub fn map<S: Into<String>>(self, spec: S) -> Self {
        self.arg("-map").arg(spec)
    }

    /// Apply final encode settings
    pub fn encode_settings(self, settings: &EncodeSettings) -> Self {
        self.video_codec(settings.video_codec.as_str())
            .audio_codec(settings.audio_codec.as_str())
            .arg("-preset")
            .arg(settings.preset.as_str())
            .arg("-crf")
            .arg(settings.crf.to_string())
            .arg("-pix_fmt")
            .arg(settings.pixel_format.as_str())
            .arg("-movflags")
            .arg("+faststart")
            .args(settings.extra_options.iter().cloned())
    }

    /// Execute the command
    pub async fn execute(&self) -> Result<()> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ReframeError::encode_failed(format!("Failed to execute media processor: {}", e), None)
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(ReframeError::encode_failed(
                format!("{} failed ({})", self.description, output.status),
                Some(stderr),
            ));
        }

        Ok(())
    }
}

/// Codec and quality options for a final, broadly compatible encode
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u8,
    pub pixel_format: String,
    pub extra_options: Vec<String>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "ultrafast".to_string(),
            crf: 23,
            pixel_format: "yuv420p".to_string(),
            extra_options: Vec::new(),
        }
    }
}

/// Builder for common media processing operations
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Re-encode a video, optionally taking the audio track from another file
    pub fn encode<P: AsRef<Path>>(
        &self,
        video_input: P,
        audio_source: Option<P>,
        output_path: P,
        settings: &EncodeSettings,
    ) -> MediaCommand {
        let cmd = MediaCommand::new(&self.binary_path, "Final encode")
            .quiet()
            .overwrite()
            .input(&video_input);

        let cmd = match audio_source {
            Some(audio) => cmd.input(audio).map("0:v:0").map("1:a:0?"),
            None => cmd.map("0:v:0").map("0:a:0?"),
        };

        cmd.encode_settings(settings).output(output_path)
    }

    /// Crop a fixed window out of every frame
    pub fn crop<P: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: P,
        window: &BoundingBox,
        settings: &EncodeSettings,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, format!("Crop to {}", window))
            .quiet()
            .overwrite()
            .input(input_path)
            .video_filter(format!(
                "crop={}:{}:{}:{}",
                window.width, window.height, window.x, window.y
            ))
            .encode_settings(settings)
            .output(output_path)
    }

    /// Cut `duration` seconds starting at `start`, re-encoding for exact cut points
    pub fn trim<P: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: P,
        start: f64,
        duration: f64,
        settings: &EncodeSettings,
    ) -> MediaCommand {
        MediaCommand::new(
            &self.binary_path,
            format!("Trim video ({:.3}s from {:.3}s)", duration, start),
        )
        .quiet()
        .overwrite()
        .input(input_path)
        .arg("-ss")
        .arg(format_ffmpeg_time(start))
        .arg("-t")
        .arg(format!("{:.3}", duration))
        .encode_settings(settings)
        .arg("-avoid_negative_ts")
        .arg("make_zero")
        .arg("-fflags")
        .arg("+genpts")
        .output(output_path)
    }

    /// Grab a single frame as an image
    pub fn extract_frame<P: AsRef<Path>>(
        &self,
        input_path: P,
        at_seconds: f64,
        output_path: P,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Frame extraction")
            .quiet()
            .overwrite()
            .arg("-ss")
            .arg(format_ffmpeg_time(at_seconds))
            .input(input_path)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("2")
            .output(output_path)
    }

    /// Decode every frame to packed RGB on stdout
    pub fn decode_raw<P: AsRef<Path>>(&self, input_path: P) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Raw frame decode")
            .quiet()
            .input(input_path)
            .map("0:v:0")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-")
    }

    /// Encode packed RGB frames from stdin into an intermediate file
    pub fn encode_raw<P: AsRef<Path>>(
        &self,
        width: u32,
        height: u32,
        frame_rate: &str,
        codec: &str,
        quality: u8,
        output_path: P,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Intermediate frame encode")
            .quiet()
            .overwrite()
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(frame_rate)
            .arg("-i")
            .arg("-")
            .no_audio()
            .video_codec(codec)
            .arg("-q:v")
            .arg(quality.to_string())
            .output(output_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check")
            .arg("-version")
    }
}

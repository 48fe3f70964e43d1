//! ffprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ReframeError, Result};

/// Properties of the first video stream of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Frame rate as reported by ffprobe, e.g. `30000/1001`
    pub frame_rate: String,
    /// Duration in seconds, 0 when unknown
    pub duration: f64,
    /// Frame count when the container reports one or it can be estimated
    pub frame_count: Option<u64>,
    /// Whether the file carries an audio stream
    pub has_audio: bool,
}

impl VideoInfo {
    /// Timestamp of a frame index.
    pub fn timestamp_of(&self, index: u64) -> f64 {
        if self.fps > 0.0 {
            index as f64 / self.fps
        } else {
            0.0
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: Option<FfprobeTags>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    /// Display rotation in degrees, normalized to `[0, 360)`.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

/// Probe a video file with ffprobe.
pub async fn probe_video(probe_path: &str, path: impl AsRef<Path>) -> Result<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ReframeError::FileNotFound(path.display().to_string()));
    }

    debug!("Probing {}", path.display());

    let output = Command::new(probe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ReframeError::Probe(format!("Failed to execute {}: {}", probe_path, e)))?;

    if !output.status.success() {
        return Err(ReframeError::Probe(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    parse_probe_output(&output.stdout)
}

/// Parse ffprobe JSON (`-show_format -show_streams`) into [`VideoInfo`].
///
/// Dimensions are the displayed ones: ffmpeg applies the stream rotation when
/// decoding, so quarter turns swap width and height.
pub fn parse_probe_output(json: &[u8]) -> Result<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ReframeError::Probe("No video stream found".to_string()))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(ReframeError::Probe("Video stream has no dimensions".to_string())),
    };
    let (width, height) = match video.rotation() {
        90 | 270 => {
            debug!("Stream is rotated a quarter turn, using {}x{}", height, width);
            (height, width)
        }
        _ => (width, height),
    };

    let (frame_rate, fps) = [video.avg_frame_rate.as_ref(), video.r_frame_rate.as_ref()]
        .into_iter()
        .flatten()
        .find_map(|r| parse_frame_rate(r).map(|fps| (r.clone(), fps)))
        .ok_or_else(|| ReframeError::Probe("Video stream has no usable frame rate".to_string()))?;

    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| (duration > 0.0).then(|| (duration * fps).round() as u64));

    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(VideoInfo {
        width,
        height,
        fps,
        frame_rate,
        duration,
        frame_count,
        has_audio,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97"); zero rates are rejected.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let fps = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };
    (fps > 0.0).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "sample_rate": "48000"},
                {"codec_type": "video", "width": 1920, "height": 1080,
                 "r_frame_rate": "30/1", "avg_frame_rate": "0/0", "nb_frames": "300"}
            ],
            "format": {"duration": "10.000000"}
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.frame_rate, "30/1");
        assert!((info.fps - 30.0).abs() < 1e-9);
        assert_eq!(info.frame_count, Some(300));
        assert!(info.has_audio);
        assert!((info.timestamp_of(45) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_frame_count_estimated_from_duration() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 360, "avg_frame_rate": "25/1"}],
            "format": {"duration": "4.0"}
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_count, Some(100));
        assert!(!info.has_audio);
    }

    #[test]
    fn test_rotated_stream_reports_display_size() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 1920, "height": 1080,
                         "avg_frame_rate": "30/1",
                         "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]}],
            "format": {"duration": "2.0"}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));

        let legacy = br#"{
            "streams": [{"codec_type": "video", "width": 1280, "height": 720,
                         "avg_frame_rate": "25/1", "tags": {"rotate": "270"}}],
            "format": {}
        }"#;
        let info = parse_probe_output(legacy).unwrap();
        assert_eq!((info.width, info.height), (720, 1280));

        let upside_down = br#"{
            "streams": [{"codec_type": "video", "width": 1280, "height": 720,
                         "avg_frame_rate": "25/1", "tags": {"rotate": "180"}}],
            "format": {}
        }"#;
        let info = parse_probe_output(upside_down).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
    }

    #[test]
    fn test_missing_video_stream() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(matches!(parse_probe_output(json), Err(ReframeError::Probe(_))));
    }
}

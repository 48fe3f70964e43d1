use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::crop::CropMode;
use crate::geometry::{AspectRatio, CropWindow, SessionConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Crop window flags. Anything left out falls back to the `[crop]` table of the config.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Output aspect ratio (3:4, 1:1, 9:16, 4:5, 16:9)
    #[arg(short, long)]
    pub aspect_ratio: Option<AspectRatio>,

    /// Horizontal center of the crop window, 0.0 (left) to 1.0 (right)
    #[arg(long)]
    pub center_x: Option<f64>,

    /// Vertical center of the crop window, 0.0 (top) to 1.0 (bottom)
    #[arg(long)]
    pub center_y: Option<f64>,

    /// Fraction of the largest fitting window to keep, in (0, 1]
    #[arg(short, long)]
    pub scale: Option<f64>,

    /// Explicit normalized window x,y,width,height; overrides center and scale
    #[arg(long)]
    pub window: Option<CropWindow>,
}

impl SessionArgs {
    pub fn apply(&self, base: SessionConfig) -> SessionConfig {
        SessionConfig {
            aspect_ratio: self.aspect_ratio.unwrap_or(base.aspect_ratio),
            center_x: self.center_x.unwrap_or(base.center_x),
            center_y: self.center_y.unwrap_or(base.center_y),
            scale: self.scale.unwrap_or(base.scale),
            window: self.window.or(base.window),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crop a video with a window that follows the detected subject
    Track {
        /// Input video file
        input: PathBuf,

        /// Output video file (defaults to <name>_tracked_<ratio>.mp4 next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        session: SessionArgs,

        /// Stop re-detecting after this many consecutive lost frames
        #[arg(long)]
        max_lost_frames: Option<u32>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Crop a video with a fixed window
    Crop {
        /// Input video file
        input: PathBuf,

        /// Output video file (defaults to <name>_cropped_<ratio>_<x>_<y>.mp4 next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        session: SessionArgs,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Cut a time range out of a video without re-encoding
    Extract {
        /// Input video file
        input: PathBuf,

        /// Start time (MM:SS or HH:MM:SS, optional .ss)
        #[arg(long)]
        start: String,

        /// End time (MM:SS or HH:MM:SS, optional .ss)
        #[arg(long)]
        end: String,

        /// Output video file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Save a still frame with the crop window outlined
    Preview {
        /// Input video file
        input: PathBuf,

        /// Output image file
        #[arg(short, long, default_value = "preview.jpg")]
        output: PathBuf,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Print stream information for a video as JSON
    Probe {
        /// Input video file
        input: PathBuf,
    },

    /// Crop every video in a directory
    Batch {
        /// Input directory containing video files
        input_dir: PathBuf,

        /// Output directory for cropped files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Crop mode (fixed or tracked)
        #[arg(short, long, default_value = "fixed")]
        mode: CropMode,

        #[command(flatten)]
        session: SessionArgs,

        /// Give up on the whole batch after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output configuration file
        #[arg(short, long, default_value = "reframe.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check that ffmpeg, ffprobe and the detection model are available
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_flags() {
        let args = Args::try_parse_from([
            "reframe",
            "track",
            "talk.mp4",
            "--aspect-ratio",
            "9:16",
            "--center-x",
            "0.3",
            "--max-lost-frames",
            "60",
            "-v",
        ])
        .unwrap();

        assert!(args.verbose);
        match args.command {
            Commands::Track {
                input,
                output,
                session,
                max_lost_frames,
                timeout,
            } => {
                assert_eq!(input, PathBuf::from("talk.mp4"));
                assert!(output.is_none());
                assert_eq!(session.aspect_ratio, Some(AspectRatio::Vertical9x16));
                assert_eq!(max_lost_frames, Some(60));
                assert!(timeout.is_none());

                let merged = session.apply(SessionConfig::default());
                assert_eq!(merged.center_x, 0.3);
                assert_eq!(merged.center_y, SessionConfig::default().center_y);
            }
            _ => panic!("expected track"),
        }
    }

    #[test]
    fn test_window_flag_overrides_center() {
        let args = Args::try_parse_from(["reframe", "crop", "in.mp4", "--window", "0.25,0.25,0.5,0.5"]).unwrap();
        match args.command {
            Commands::Crop { session, .. } => {
                let merged = session.apply(SessionConfig::default());
                assert_eq!(merged.window, Some(CropWindow::new(0.25, 0.25, 0.5, 0.5)));
            }
            _ => panic!("expected crop"),
        }
        assert!(Args::try_parse_from(["reframe", "crop", "in.mp4", "--window", "0.5,0.5"]).is_err());
    }

    #[test]
    fn test_bad_aspect_ratio_is_rejected() {
        let result = Args::try_parse_from(["reframe", "crop", "in.mp4", "-a", "2:1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_batch_mode_parses() {
        let args = Args::try_parse_from(["reframe", "batch", "clips", "--mode", "tracked"]).unwrap();
        match args.command {
            Commands::Batch { mode, output_dir, .. } => {
                assert_eq!(mode, CropMode::Tracked);
                assert!(output_dir.is_none());
            }
            _ => panic!("expected batch"),
        }
    }
}

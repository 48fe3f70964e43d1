//! Sequential frame access over ffmpeg raw-video pipes.

use image::RgbImage;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

use crate::config::MediaConfig;
use crate::error::{ReframeError, Result};
use super::commands::{MediaCommand, MediaCommandBuilder};
use super::probe::VideoInfo;

/// One decoded frame. Owned by the frame loop for a single iteration.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub timestamp: f64,
    pub image: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Ordered source of decoded frames.
pub trait FrameSource: Send {
    /// Frame size shared by every frame of the source
    fn dimensions(&self) -> (u32, u32);

    /// Next frame, or `None` once the source is exhausted
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Ordered destination for cropped frames.
pub trait FrameSink: Send {
    fn write_frame(&mut self, image: &RgbImage) -> Result<()>;

    /// Flush and close the sink, returning the number of frames written
    fn finish(&mut self) -> Result<u64>;
}

/// Opens both ends of a frame loop: the decoded source and the intermediate sink.
pub trait FramePipes: Send + Sync {
    fn open_source(&self, input: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSource>>;

    fn create_sink(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        info: &VideoInfo,
    ) -> Result<Box<dyn FrameSink>>;
}

/// ffmpeg raw-video pipes configured from `[media]`.
pub struct FfmpegFramePipes {
    media: MediaConfig,
}

impl FfmpegFramePipes {
    pub fn new(media: MediaConfig) -> Self {
        Self { media }
    }
}

impl FramePipes for FfmpegFramePipes {
    fn open_source(&self, input: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegFrameReader::open(&self.media.binary_path, input, info)?))
    }

    fn create_sink(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        info: &VideoInfo,
    ) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegFrameWriter::create(
            &self.media.binary_path,
            output,
            width,
            height,
            &info.frame_rate,
            &self.media.intermediate_codec,
            self.media.intermediate_quality,
        )?))
    }
}

fn spawn(command: &MediaCommand, stdin: Stdio, stdout: Stdio) -> Result<Child> {
    debug!("Spawning {}: {} {:?}", command.description, command.binary_path, command.args);
    Command::new(&command.binary_path)
        .args(&command.args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ReframeError::encode_failed(format!("Failed to spawn {}: {}", command.binary_path, e), None))
}

fn drain_stderr(stderr: Option<ChildStderr>) -> String {
    let mut text = String::new();
    if let Some(mut stderr) = stderr {
        let _ = stderr.read_to_string(&mut text);
    }
    text
}

/// Decodes a video to RGB frames through `ffmpeg -f rawvideo`.
pub struct FfmpegFrameReader {
    child: Child,
    stdout: BufReader<ChildStdout>,
    info: VideoInfo,
    frame_len: usize,
    next_index: u64,
    finished: bool,
}

impl FfmpegFrameReader {
    pub fn open(binary_path: &str, input: &Path, info: &VideoInfo) -> Result<Self> {
        let command = MediaCommandBuilder::new(binary_path).decode_raw(input);
        let mut child = spawn(&command, Stdio::null(), Stdio::piped())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReframeError::frame_io(0, "Failed to capture decoder stdout"))?;

        Ok(Self {
            child,
            stdout: BufReader::with_capacity(1 << 20, stdout),
            info: info.clone(),
            frame_len: info.width as usize * info.height as usize * 3,
            next_index: 0,
            finished: false,
        })
    }

    fn close(&mut self) -> Result<()> {
        self.finished = true;
        let status = self
            .child
            .wait()
            .map_err(|e| ReframeError::frame_io(self.next_index, format!("Decoder wait failed: {}", e)))?;
        if !status.success() {
            let stderr = drain_stderr(self.child.stderr.take());
            return Err(ReframeError::frame_io(
                self.next_index,
                format!("Decoder exited with {}: {}", status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

impl FrameSource for FfmpegFrameReader {
    fn dimensions(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < self.frame_len {
            let read = self
                .stdout
                .read(&mut buffer[filled..])
                .map_err(|e| ReframeError::frame_io(self.next_index, format!("Decode read failed: {}", e)))?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        if filled == 0 {
            self.close()?;
            return Ok(None);
        }
        if filled < self.frame_len {
            return Err(ReframeError::frame_io(
                self.next_index,
                format!("Truncated frame: {} of {} bytes", filled, self.frame_len),
            ));
        }

        let image = RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .ok_or_else(|| ReframeError::frame_io(self.next_index, "Frame buffer size mismatch"))?;
        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(Frame {
            index,
            timestamp: self.info.timestamp_of(index),
            image,
        }))
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Encodes RGB frames into an intermediate file through ffmpeg's stdin.
pub struct FfmpegFrameWriter {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl FfmpegFrameWriter {
    pub fn create(
        binary_path: &str,
        output: &Path,
        width: u32,
        height: u32,
        frame_rate: &str,
        codec: &str,
        quality: u8,
    ) -> Result<Self> {
        let command = MediaCommandBuilder::new(binary_path)
            .encode_raw(width, height, frame_rate, codec, quality, output);
        let mut child = spawn(&command, Stdio::piped(), Stdio::null())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReframeError::frame_io(0, "Failed to capture encoder stdin"))?;

        Ok(Self {
            child,
            stdin: Some(BufWriter::with_capacity(1 << 20, stdin)),
            width,
            height,
            frames_written: 0,
        })
    }
}

impl FrameSink for FfmpegFrameWriter {
    fn write_frame(&mut self, image: &RgbImage) -> Result<()> {
        if image.dimensions() != (self.width, self.height) {
            return Err(ReframeError::frame_io(
                self.frames_written,
                format!(
                    "Frame is {}x{}, sink expects {}x{}",
                    image.width(),
                    image.height(),
                    self.width,
                    self.height
                ),
            ));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ReframeError::frame_io(self.frames_written, "Sink already finished"))?;
        stdin
            .write_all(image.as_raw())
            .map_err(|e| ReframeError::frame_io(self.frames_written, format!("Encode write failed: {}", e)))?;

        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.flush() {
                let _ = self.child.kill();
                let _ = self.child.wait();
                return Err(ReframeError::frame_io(self.frames_written, format!("Encode flush failed: {}", e)));
            }
        }

        let status = self.child.wait()?;
        if !status.success() {
            let stderr = drain_stderr(self.child.stderr.take());
            return Err(ReframeError::encode_failed(
                format!("Intermediate encode exited with {}", status),
                Some(stderr),
            ));
        }

        Ok(self.frames_written)
    }
}

impl Drop for FfmpegFrameWriter {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            warn!("Intermediate encoder dropped before finish, killing it");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// In-memory frame source, used when frames are already decoded.
pub struct MemoryFrameSource {
    frames: std::vec::IntoIter<RgbImage>,
    width: u32,
    height: u32,
    fps: f64,
    next_index: u64,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        Self {
            frames: frames.into_iter(),
            width,
            height,
            fps,
            next_index: 0,
        }
    }
}

impl FrameSource for MemoryFrameSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(image) = self.frames.next() else {
            return Ok(None);
        };
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Frame {
            index,
            timestamp: if self.fps > 0.0 { index as f64 / self.fps } else { 0.0 },
            image,
        }))
    }
}

/// Collects frames in memory.
#[derive(Debug, Default)]
pub struct MemoryFrameSink {
    pub frames: Vec<RgbImage>,
    pub finished: bool,
}

impl FrameSink for MemoryFrameSink {
    fn write_frame(&mut self, image: &RgbImage) -> Result<()> {
        if self.finished {
            return Err(ReframeError::frame_io(self.frames.len() as u64, "Sink already finished"));
        }
        self.frames.push(image.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        self.finished = true;
        Ok(self.frames.len() as u64)
    }
}

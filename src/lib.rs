//! Reframe - subject-aware video cropping
//!
//! Crops landscape video to portrait, square or other aspect ratios, either
//! with a fixed window or with a window that follows a detected person
//! (YOLO detection via ONNX Runtime plus a template tracker), using ffmpeg
//! for decoding and encoding.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod crop;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod media;
pub mod preview;
pub mod timecode;
pub mod track;
pub mod workflow;

//! Camera Capture Library for Interview Video Analytics
//!
//! Provides the frame plumbing around the engagement pipeline:
//! - Decoding client-pushed frames (base64, optionally data-URI prefixed)
//! - Re-encoding processed frames as JPEG / MJPEG parts for live preview
//! - Replayable frame sources standing in for a webcam device

pub mod codec;
pub mod frame;
pub mod source;

pub use codec::{decode_image_bytes, decode_payload, encode_jpeg, mjpeg_part, strip_data_uri, MJPEG_BOUNDARY};
pub use frame::VideoFrame;
pub use source::{FrameSource, ImageSequenceSource, MemorySource};

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    /// Device could not be opened; surfaced to the UI as "camera unavailable"
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("Frame read failed: {0}")]
    Read(String),

    #[error("Camera not started")]
    NotStarted,
}

/// Frame codec error types
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty frame payload")]
    Empty,

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Frame buffer does not match {width}x{height}")]
    BufferSize { width: u32, height: u32 },
}

/// Camera configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Frame source location (directory of replay frames)
    pub device: String,
    /// Target FPS for the live loop
    pub fps: u32,
    /// Restart from the first frame when the sequence is exhausted
    pub looping: bool,
    /// JPEG quality for re-encoded preview frames (1-100)
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "./footage".to_string(),
            fps: 10,
            looping: true,
            jpeg_quality: 80,
        }
    }
}

impl CameraConfig {
    /// Create replay config for a directory of frames
    pub fn replay(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Interval between frames at the configured rate
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

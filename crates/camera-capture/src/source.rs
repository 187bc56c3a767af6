//! Frame sources for the live preview loop
//!
//! A `FrameSource` plays the part of a camera device: it is started once,
//! read frame by frame, and stopped when the stream ends or the client
//! disconnects. Stopping must release the underlying handle immediately.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::{codec, CameraConfig, CameraError, VideoFrame};

/// Image file extensions accepted by `ImageSequenceSource`
const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// A camera-like producer of frames
pub trait FrameSource: Send {
    /// Open the device and start streaming
    fn start(&mut self) -> Result<(), CameraError>;

    /// Stop streaming and release the device
    fn stop(&mut self);

    /// Check if streaming
    fn is_streaming(&self) -> bool;

    /// Read the next frame; `Ok(None)` means the stream has ended
    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Replays a directory of image files as if it were a camera
pub struct ImageSequenceSource {
    directory: PathBuf,
    looping: bool,
    files: Vec<PathBuf>,
    cursor: usize,
    sequence: u32,
    streaming: bool,
}

impl ImageSequenceSource {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            directory: PathBuf::from(&config.device),
            looping: config.looping,
            files: Vec::new(),
            cursor: 0,
            sequence: 0,
            streaming: false,
        }
    }

    fn scan(directory: &Path) -> Result<Vec<PathBuf>, CameraError> {
        let entries = std::fs::read_dir(directory)
            .map_err(|e| CameraError::Unavailable(format!("{}: {}", directory.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl FrameSource for ImageSequenceSource {
    fn start(&mut self) -> Result<(), CameraError> {
        let files = Self::scan(&self.directory)?;
        if files.is_empty() {
            return Err(CameraError::Unavailable(format!(
                "no frames in {}",
                self.directory.display()
            )));
        }
        info!("Replay source opened: {} ({} frames)", self.directory.display(), files.len());
        self.files = files;
        self.cursor = 0;
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.streaming {
            info!("Replay source closed: {}", self.directory.display());
        }
        self.streaming = false;
        self.files.clear();
        self.cursor = 0;
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        if !self.streaming {
            return Err(CameraError::NotStarted);
        }

        // Each file is tried at most once per call so a directory of
        // unreadable images cannot spin forever.
        for _ in 0..self.files.len() {
            if self.cursor >= self.files.len() {
                if !self.looping {
                    return Ok(None);
                }
                self.cursor = 0;
            }

            let path = &self.files[self.cursor];
            self.cursor += 1;

            let bytes = std::fs::read(path)
                .map_err(|e| CameraError::Read(format!("{}: {}", path.display(), e)))?;

            match codec::decode_image_bytes(&bytes) {
                Ok(frame) => {
                    self.sequence = self.sequence.wrapping_add(1);
                    debug!("Replayed frame {} from {}", self.sequence, path.display());
                    return Ok(Some(frame.with_sequence(self.sequence, now_ns())));
                }
                Err(e) => warn!("Skipping undecodable frame {}: {}", path.display(), e),
            }
        }

        if self.cursor >= self.files.len() && !self.looping {
            Ok(None)
        } else {
            Err(CameraError::Read(format!(
                "no decodable frames in {}",
                self.directory.display()
            )))
        }
    }
}

/// In-memory frame queue, for pre-recorded sessions and tests
#[derive(Default)]
pub struct MemorySource {
    frames: VecDeque<VideoFrame>,
    streaming: bool,
    fail_on_start: bool,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = VideoFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            streaming: false,
            fail_on_start: false,
        }
    }

    /// A source whose device can never be opened
    pub fn unavailable() -> Self {
        Self {
            fail_on_start: true,
            ..Default::default()
        }
    }

    /// Frames not yet read
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn start(&mut self) -> Result<(), CameraError> {
        if self.fail_on_start {
            return Err(CameraError::Unavailable("memory source disabled".into()));
        }
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.streaming = false;
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        if !self.streaming {
            return Err(CameraError::NotStarted);
        }
        Ok(self.frames.pop_front())
    }
}

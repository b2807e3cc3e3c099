// Data structures for decoded video frames and media timing

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A decoded video frame handed to the pipeline
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: PixelFormat,
}

/// Pixel format of decoded frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
}

/// A frame as it flows through the pipeline.
///
/// `media_time_secs` is required for any cache lookup and is present for
/// file playback/extraction; live capture leaves it unset. `captured_image`
/// is only populated during extraction (downstream thumbnailing) and is
/// otherwise absent.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub frame: Arc<VideoFrame>,
    pub monotonic_ms: i64,
    pub media_time_secs: Option<f64>,
    pub captured_image: Option<RgbaImage>,
}

impl FrameEvent {
    pub fn new(frame: Arc<VideoFrame>, monotonic_ms: i64) -> Self {
        Self {
            frame,
            monotonic_ms,
            media_time_secs: None,
            captured_image: None,
        }
    }

    pub fn with_media_time(mut self, secs: f64) -> Self {
        self.media_time_secs = Some(secs);
        self
    }
}

/// Timing events consumed from the surrounding media player.
///
/// The pipeline never owns a playback clock; seeking and play/pause arrive
/// as discrete events alongside a continuously readable current time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaTimingEvent {
    Playing,
    Paused,
    Seeked { time_secs: f64 },
}

/// Error types for frame acquisition and decode
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Media not available: {0}")]
    MediaUnavailable(String),
}

pub type FrameResult<T> = Result<T, FrameError>;

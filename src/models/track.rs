// Serialized track format: the full ordered sequence of per-frame pose data
// extracted from one video

use crate::models::pose::Keypoint;
use serde::{Deserialize, Serialize};

/// Current track file format version
pub const TRACK_FORMAT_VERSION: u32 = 1;

/// Angles computed at extraction time so playback never re-derives them
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrecomputedAngles {
    pub spine_angle: f32,
    pub arm_angle: Option<f32>,
    pub hip_angle: Option<f32>,
    pub knee_angle: Option<f32>,
}

/// One frame of extracted pose data. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFrame {
    pub frame_index: u32,
    pub timestamp_ms: i64,
    pub video_time_secs: f64,
    pub keypoints: Vec<Keypoint>,
    pub angles: Option<PrecomputedAngles>,
    pub confidence: f32,
}

/// Metadata describing how a track was produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub version: u32,
    pub model_name: String,
    pub model_version: String,
    pub source_hash: String,
    pub source_duration_secs: f64,
    pub extracted_at: String,
    pub frame_count: u32,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl TrackMetadata {
    pub fn new(model_name: &str, model_version: &str, source_hash: &str) -> Self {
        Self {
            version: TRACK_FORMAT_VERSION,
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            source_hash: source_hash.to_string(),
            source_duration_secs: 0.0,
            extracted_at: chrono::Utc::now().to_rfc3339(),
            frame_count: 0,
            fps: 0.0,
            width: 0,
            height: 0,
        }
    }
}

/// A complete extracted track: metadata plus frames ordered by `frame_index`.
///
/// Writers sort before serializing; readers must not assume the input is
/// sorted and re-sort on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub metadata: TrackMetadata,
    pub frames: Vec<CachedFrame>,
}

impl Track {
    pub fn new(metadata: TrackMetadata, mut frames: Vec<CachedFrame>) -> Self {
        frames.sort_by_key(|f| f.frame_index);
        let mut metadata = metadata;
        metadata.frame_count = frames.len() as u32;
        Self { metadata, frames }
    }

    /// Restore the frame-index ordering invariant after deserialization
    pub fn normalize(&mut self) {
        self.frames.sort_by_key(|f| f.frame_index);
        self.metadata.frame_count = self.frames.len() as u32;
    }

    pub fn to_json(&self) -> TrackResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> TrackResult<Self> {
        let mut track: Track = serde_json::from_str(json)?;
        track.normalize();
        Ok(track)
    }
}

/// Error types for track persistence
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    StoreFailed(String),
}

pub type TrackResult<T> = Result<T, TrackError>;

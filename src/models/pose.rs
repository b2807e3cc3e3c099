// Data models for pose keypoints and derived skeletons

use serde::{Deserialize, Serialize};

/// Default visibility threshold below which a keypoint is treated as unseen
pub const DEFAULT_VISIBILITY_THRESHOLD: f32 = 0.2;

/// Named body landmarks the skeleton math consumes.
///
/// This is deliberately a closed subset of the full 33-landmark model: the
/// angle computations only ever read these joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypointName {
    Nose,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

/// A named 2D keypoint with a visibility/confidence score
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub visibility: f32,
    pub name: KeypointName,
}

impl Keypoint {
    pub fn new(name: KeypointName, x: f32, y: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            visibility,
            name,
        }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility > threshold
    }
}

/// Raw output of the external pose-estimation provider for one frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseDetection {
    pub keypoints: Vec<Keypoint>,
    pub score: f32,
}

impl PoseDetection {
    pub fn keypoint(&self, name: KeypointName) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.name == name)
    }
}

/// Derived per-frame skeleton: keypoints plus the angles the form logic reads.
///
/// Angles are in degrees. `spine_angle` is the deviation of the hip-to-shoulder
/// axis from vertical (0 = upright, 90 = horizontal). The optional joint angles
/// are absent when the joints involved are not visible enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkeletonSnapshot {
    pub keypoints: Vec<Keypoint>,
    pub spine_angle: f32,
    pub arm_angle: Option<f32>,
    pub hip_angle: Option<f32>,
    pub knee_angle: Option<f32>,
    pub has_required_visibility: bool,
}

/// Error types for pose estimation
#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("Pose estimator not initialized")]
    NotInitialized,

    #[error("Pose estimator unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type PoseResult<T> = Result<T, PoseError>;

// Skeleton builder - pure functions from named keypoints to derived angles

use crate::models::pose::{
    Keypoint, KeypointName, PoseDetection, SkeletonSnapshot, DEFAULT_VISIBILITY_THRESHOLD,
};
use crate::models::track::{CachedFrame, PrecomputedAngles};

/// Builds `SkeletonSnapshot`s from raw detections
#[derive(Debug, Clone, Copy)]
pub struct SkeletonBuilder {
    visibility_threshold: f32,
}

impl Default for SkeletonBuilder {
    fn default() -> Self {
        Self {
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
        }
    }
}

impl SkeletonBuilder {
    pub fn new(visibility_threshold: f32) -> Self {
        Self {
            visibility_threshold,
        }
    }

    /// Build a snapshot from a detection. Returns `None` when the required
    /// keypoints (both shoulders, both hips) are not visible enough.
    pub fn build(&self, detection: &PoseDetection) -> Option<SkeletonSnapshot> {
        let left_shoulder = self.visible(detection, KeypointName::LeftShoulder)?;
        let right_shoulder = self.visible(detection, KeypointName::RightShoulder)?;
        let left_hip = self.visible(detection, KeypointName::LeftHip)?;
        let right_hip = self.visible(detection, KeypointName::RightHip)?;

        let shoulder_mid = midpoint(left_shoulder, right_shoulder);
        let hip_mid = midpoint(left_hip, right_hip);
        let spine_angle = spine_angle_from_vertical(hip_mid, shoulder_mid);

        let arm_angle = self.average_side_angle(|side| {
            let shoulder = self.visible_side(detection, side, true)?;
            let elbow = self.visible(
                detection,
                if side == Side::Left {
                    KeypointName::LeftElbow
                } else {
                    KeypointName::RightElbow
                },
            )?;
            // Arm-to-spine: angle between shoulder->elbow and shoulder->hip
            let hip = self.visible_side(detection, side, false)?;
            Some(angle_between(
                (elbow.x - shoulder.x, elbow.y - shoulder.y),
                (hip.x - shoulder.x, hip.y - shoulder.y),
            ))
        });

        let hip_angle = self.average_side_angle(|side| {
            let hip = self.visible_side(detection, side, false)?;
            let shoulder = self.visible_side(detection, side, true)?;
            let knee = self.visible(
                detection,
                if side == Side::Left {
                    KeypointName::LeftKnee
                } else {
                    KeypointName::RightKnee
                },
            )?;
            Some(angle_between(
                (shoulder.x - hip.x, shoulder.y - hip.y),
                (knee.x - hip.x, knee.y - hip.y),
            ))
        });

        let knee_angle = self.average_side_angle(|side| {
            let (knee_name, hip_name, ankle_name) = match side {
                Side::Left => (
                    KeypointName::LeftKnee,
                    KeypointName::LeftHip,
                    KeypointName::LeftAnkle,
                ),
                Side::Right => (
                    KeypointName::RightKnee,
                    KeypointName::RightHip,
                    KeypointName::RightAnkle,
                ),
            };
            let knee = self.visible(detection, knee_name)?;
            let hip = self.visible(detection, hip_name)?;
            let ankle = self.visible(detection, ankle_name)?;
            Some(angle_between(
                (hip.x - knee.x, hip.y - knee.y),
                (ankle.x - knee.x, ankle.y - knee.y),
            ))
        });

        Some(SkeletonSnapshot {
            keypoints: detection.keypoints.clone(),
            spine_angle,
            arm_angle,
            hip_angle,
            knee_angle,
            has_required_visibility: true,
        })
    }

    /// Rebuild a snapshot from a cached frame, preferring angles computed at
    /// extraction time
    pub fn from_cached(&self, frame: &CachedFrame) -> Option<SkeletonSnapshot> {
        if let Some(angles) = frame.angles {
            return Some(SkeletonSnapshot {
                keypoints: frame.keypoints.clone(),
                spine_angle: angles.spine_angle,
                arm_angle: angles.arm_angle,
                hip_angle: angles.hip_angle,
                knee_angle: angles.knee_angle,
                has_required_visibility: true,
            });
        }
        let detection = PoseDetection {
            keypoints: frame.keypoints.clone(),
            score: frame.confidence,
        };
        self.build(&detection)
    }

    /// Extract the precomputed-angle record for a snapshot
    pub fn angles_of(snapshot: &SkeletonSnapshot) -> PrecomputedAngles {
        PrecomputedAngles {
            spine_angle: snapshot.spine_angle,
            arm_angle: snapshot.arm_angle,
            hip_angle: snapshot.hip_angle,
            knee_angle: snapshot.knee_angle,
        }
    }

    fn visible<'a>(&self, detection: &'a PoseDetection, name: KeypointName) -> Option<&'a Keypoint> {
        detection
            .keypoint(name)
            .filter(|k| k.is_visible(self.visibility_threshold))
    }

    fn visible_side<'a>(
        &self,
        detection: &'a PoseDetection,
        side: Side,
        shoulder: bool,
    ) -> Option<&'a Keypoint> {
        let name = match (side, shoulder) {
            (Side::Left, true) => KeypointName::LeftShoulder,
            (Side::Right, true) => KeypointName::RightShoulder,
            (Side::Left, false) => KeypointName::LeftHip,
            (Side::Right, false) => KeypointName::RightHip,
        };
        self.visible(detection, name)
    }

    /// Average an angle over whichever sides are computable
    fn average_side_angle<F>(&self, f: F) -> Option<f32>
    where
        F: Fn(Side) -> Option<f32>,
    {
        let left = f(Side::Left);
        let right = f(Side::Right);
        match (left, right) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            (Some(l), None) => Some(l),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

fn midpoint(a: &Keypoint, b: &Keypoint) -> (f32, f32) {
    ((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Deviation of the hip->shoulder axis from vertical, in degrees [0, 180].
///
/// Image coordinates grow downward, so an upright torso has the shoulder
/// midpoint above (smaller y than) the hip midpoint.
pub fn spine_angle_from_vertical(hip_mid: (f32, f32), shoulder_mid: (f32, f32)) -> f32 {
    let dx = shoulder_mid.0 - hip_mid.0;
    let dy = shoulder_mid.1 - hip_mid.1;
    // Vertical reference points "up" in image space: (0, -1)
    dx.atan2(-dy).to_degrees().abs()
}

/// Unsigned angle between two 2D vectors, degrees [0, 180]
pub fn angle_between(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dot = a.0 * b.0 + a.1 * b.1;
    let cross = a.0 * b.1 - a.1 * b.0;
    cross.atan2(dot).to_degrees().abs()
}

// Pose-estimation provider seam
// The model itself is an external capability: anything that can map a video
// frame to a set of named keypoints plugs in through this trait.

use crate::models::frame::VideoFrame;
use crate::models::pose::{PoseDetection, PoseResult};
use async_trait::async_trait;

/// External pose-estimation capability.
///
/// `estimate` returning `Ok(None)` means no pose was found in the frame; that
/// is a normal per-frame outcome, not an error.
#[async_trait]
pub trait PoseEstimator: Send + Sync {
    /// Load/warm the model. Must be called before `estimate`.
    async fn initialize(&self) -> PoseResult<()>;

    /// Run inference on a single frame
    async fn estimate(&self, frame: &VideoFrame) -> PoseResult<Option<PoseDetection>>;

    fn is_initialized(&self) -> bool;

    fn model_name(&self) -> &str;

    fn model_version(&self) -> &str;
}

/// Fallback estimator used when no model backend is wired up.
///
/// Initializes successfully and reports a detection miss on every frame, so
/// the pipeline runs end to end with null skeletons.
pub struct NullEstimator;

#[async_trait]
impl PoseEstimator for NullEstimator {
    async fn initialize(&self) -> PoseResult<()> {
        log::warn!("NullEstimator in use: every frame will be a detection miss");
        Ok(())
    }

    async fn estimate(&self, _frame: &VideoFrame) -> PoseResult<Option<PoseDetection>> {
        Ok(None)
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "null"
    }

    fn model_version(&self) -> &str {
        "0"
    }
}

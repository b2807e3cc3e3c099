// Live skeleton source - runs the external estimator against a camera feed,
// publishing one skeleton event per capture tick. No caching: time-indexed
// lookups report unavailable by contract.

use crate::core::skeleton::SkeletonBuilder;
use crate::core::source::{
    SkeletonEvent, SkeletonFanout, SkeletonSource, SourceError, SourceResult, SourceState,
    StateCell,
};
use crate::models::frame::{FrameResult, VideoFrame};
use crate::provider::PoseEstimator;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Live frame acquisition seam (camera, screen, test harness)
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture_frame(&self) -> FrameResult<VideoFrame>;
}

pub struct LiveSkeletonSource {
    estimator: Arc<dyn PoseEstimator>,
    frames: Arc<dyn FrameSource>,
    builder: SkeletonBuilder,
    capture_interval: Duration,
    fanout: Arc<SkeletonFanout>,
    state: Arc<StateCell>,
    cancel: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSkeletonSource {
    pub fn new(
        estimator: Arc<dyn PoseEstimator>,
        frames: Arc<dyn FrameSource>,
        builder: SkeletonBuilder,
        capture_interval: Duration,
    ) -> Self {
        Self {
            estimator,
            frames,
            builder,
            capture_interval,
            fanout: Arc::new(SkeletonFanout::new()),
            state: Arc::new(StateCell::new()),
            cancel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    async fn capture_loop(
        frames: Arc<dyn FrameSource>,
        estimator: Arc<dyn PoseEstimator>,
        builder: SkeletonBuilder,
        fanout: Arc<SkeletonFanout>,
        capture_interval: Duration,
        token: CancellationToken,
    ) {
        let mut ticker = interval(capture_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    log::info!("live capture loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let frame = match frames.capture_frame().await {
                        Ok(frame) => frame,
                        Err(err) => {
                            log::warn!("live capture failed: {err}");
                            continue;
                        }
                    };
                    let snapshot = match estimator.estimate(&frame).await {
                        Ok(Some(detection)) => builder.build(&detection),
                        // Detection miss: publish a null skeleton
                        Ok(None) => None,
                        Err(err) => {
                            log::warn!("inference failed: {err}");
                            None
                        }
                    };
                    fanout.publish(&SkeletonEvent {
                        snapshot,
                        video_time_secs: None,
                        timestamp_ms: frame.timestamp_ms,
                        frame_index: None,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl SkeletonSource for LiveSkeletonSource {
    async fn start(&self) -> SourceResult<()> {
        match self.state.get() {
            SourceState::Idle | SourceState::Error => {}
            _ => return Err(SourceError::AlreadyRunning),
        }
        self.state.set(SourceState::Starting);

        if let Err(err) = self.estimator.initialize().await {
            self.state.set(SourceState::Error);
            return Err(SourceError::ProviderUnavailable(err.to_string()));
        }

        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());

        let handle = tokio::spawn(Self::capture_loop(
            self.frames.clone(),
            self.estimator.clone(),
            self.builder,
            self.fanout.clone(),
            self.capture_interval,
            token,
        ));
        *self.worker.lock().await = Some(handle);

        self.state.set(SourceState::Active);
        log::info!(
            "live source active (model {} {})",
            self.estimator.model_name(),
            self.estimator.model_version()
        );
        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
        }
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(err) = handle.await {
                log::warn!("live worker join failed: {err}");
            }
        }
        if self.state.get() != SourceState::Error {
            self.state.set(SourceState::Idle);
        }
    }

    async fn dispose(&self) {
        self.stop().await;
        self.fanout.close();
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<SkeletonEvent> {
        self.fanout.subscribe()
    }

    fn state(&self) -> SourceState {
        self.state.get()
    }

    fn state_stream(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }

    /// Live capture keeps no history
    fn skeleton_at(&self, _time_secs: f64) -> Option<SkeletonEvent> {
        None
    }

    fn has_skeleton_at(&self, _time_secs: f64) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::frame::PixelFormat;
    use crate::models::pose::{Keypoint, KeypointName, PoseDetection, PoseError, PoseResult};

    struct ScriptedFrames;

    #[async_trait]
    impl FrameSource for ScriptedFrames {
        async fn capture_frame(&self) -> FrameResult<VideoFrame> {
            Ok(VideoFrame {
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
                width: 4,
                height: 4,
                data: vec![0u8; 64],
                format: PixelFormat::Rgba8,
            })
        }
    }

    struct ScriptedEstimator {
        fail_init: bool,
    }

    #[async_trait]
    impl PoseEstimator for ScriptedEstimator {
        async fn initialize(&self) -> PoseResult<()> {
            if self.fail_init {
                Err(PoseError::ProviderUnavailable("model missing".into()))
            } else {
                Ok(())
            }
        }

        async fn estimate(&self, _frame: &VideoFrame) -> PoseResult<Option<PoseDetection>> {
            Ok(Some(PoseDetection {
                keypoints: vec![
                    Keypoint::new(KeypointName::LeftShoulder, 0.45, 0.3, 0.9),
                    Keypoint::new(KeypointName::RightShoulder, 0.55, 0.3, 0.9),
                    Keypoint::new(KeypointName::LeftHip, 0.45, 0.6, 0.9),
                    Keypoint::new(KeypointName::RightHip, 0.55, 0.6, 0.9),
                ],
                score: 0.9,
            }))
        }

        fn is_initialized(&self) -> bool {
            !self.fail_init
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn model_version(&self) -> &str {
            "1"
        }
    }

    fn source(fail_init: bool) -> LiveSkeletonSource {
        LiveSkeletonSource::new(
            Arc::new(ScriptedEstimator { fail_init }),
            Arc::new(ScriptedFrames),
            SkeletonBuilder::default(),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_live_source_publishes_snapshots() {
        let source = source(false);
        let mut events = source.subscribe();
        source.start().await.unwrap();
        assert_eq!(source.state(), SourceState::Active);

        let event = events.recv().await.unwrap();
        let snapshot = event.snapshot.expect("estimator produced a pose");
        assert!(snapshot.has_required_visibility);
        assert!(event.video_time_secs.is_none());

        source.stop().await;
        assert_eq!(source.state(), SourceState::Idle);
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_fatal_for_the_source() {
        let source = source(true);
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, SourceError::ProviderUnavailable(_)), "{err}");
        assert_eq!(source.state(), SourceState::Error);

        // Explicit restart is allowed from the error state
        assert!(source.start().await.is_err());
    }

    #[tokio::test]
    async fn test_live_source_has_no_time_index() {
        let source = source(false);
        source.start().await.unwrap();
        assert!(source.skeleton_at(0.0).is_none());
        assert!(!source.has_skeleton_at(0.0));
        source.dispose().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let source = source(false);
        source.start().await.unwrap();
        source.stop().await;
        source.stop().await;
        assert_eq!(source.state(), SourceState::Idle);

        // Restartable after stop
        source.start().await.unwrap();
        assert_eq!(source.state(), SourceState::Active);
        source.dispose().await;
    }
}

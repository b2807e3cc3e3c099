// Rep pipeline - frame acquisition, skeleton transform, checkpoint
// detection, rep counting. The transform stage is swappable between live
// inference and cached replay; stages downstream never know which is active.

use crate::core::form_processor::{CheckpointEvent, FormProcessor};
use crate::core::pose_cache::{round_time_ms, CacheError, StreamingPoseCache};
use crate::core::rep_counter::RepCounter;
use crate::core::skeleton::SkeletonBuilder;
use crate::core::source::SkeletonEvent;
use crate::models::exercise::{ExerciseDefinition, RepCountResult};
use crate::models::frame::{FrameEvent, MediaTimingEvent};
use crate::models::pose::PoseError;
use crate::provider::PoseEstimator;
use async_trait::async_trait;
use std::sync::Arc;

/// Cached-transform lookup window while extraction is still filling the
/// cache, seconds. Roughly three frames at 30 fps.
pub const DEFAULT_OPEN_TOLERANCE_SECS: f64 = 0.1;

/// Error types for the pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Frame carries no media time; cached transform needs one")]
    MissingMediaTime,

    #[error("Pose error: {0}")]
    Pose(#[from] PoseError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Stage-2 contract: one frame in, one skeleton event out
#[async_trait]
pub trait SkeletonTransform: Send + Sync {
    async fn initialize(&self) -> PipelineResult<()>;

    async fn transform(&self, event: &FrameEvent) -> PipelineResult<SkeletonEvent>;

    fn is_live(&self) -> bool;
}

/// Runs the external estimator on every frame
pub struct LiveTransform {
    estimator: Arc<dyn PoseEstimator>,
    builder: SkeletonBuilder,
}

impl LiveTransform {
    pub fn new(estimator: Arc<dyn PoseEstimator>, builder: SkeletonBuilder) -> Self {
        Self { estimator, builder }
    }
}

#[async_trait]
impl SkeletonTransform for LiveTransform {
    async fn initialize(&self) -> PipelineResult<()> {
        self.estimator.initialize().await?;
        Ok(())
    }

    async fn transform(&self, event: &FrameEvent) -> PipelineResult<SkeletonEvent> {
        let detection = self.estimator.estimate(&event.frame).await?;
        Ok(SkeletonEvent {
            snapshot: detection.as_ref().and_then(|d| self.builder.build(d)),
            video_time_secs: event.media_time_secs,
            timestamp_ms: event.monotonic_ms,
            frame_index: None,
        })
    }

    fn is_live(&self) -> bool {
        true
    }
}

/// Replays a streaming pose cache by media time.
///
/// While the cache is still open, only frames within `open_tolerance_secs`
/// resolve; anything further produces a null skeleton rather than a visibly
/// stale one. Once sealed, the closest frame always resolves.
pub struct CachedTransform {
    cache: Arc<StreamingPoseCache>,
    builder: SkeletonBuilder,
    open_tolerance_secs: f64,
}

impl CachedTransform {
    pub fn new(cache: Arc<StreamingPoseCache>, builder: SkeletonBuilder) -> Self {
        Self {
            cache,
            builder,
            open_tolerance_secs: DEFAULT_OPEN_TOLERANCE_SECS,
        }
    }

    pub fn with_open_tolerance(mut self, tolerance_secs: f64) -> Self {
        self.open_tolerance_secs = tolerance_secs;
        self
    }
}

#[async_trait]
impl SkeletonTransform for CachedTransform {
    async fn initialize(&self) -> PipelineResult<()> {
        // Nothing to load; the cache owner did the inference
        Ok(())
    }

    async fn transform(&self, event: &FrameEvent) -> PipelineResult<SkeletonEvent> {
        let time_secs = event
            .media_time_secs
            .ok_or(PipelineError::MissingMediaTime)?;

        let frame = if self.cache.is_complete() {
            self.cache.get_frame(time_secs)
        } else {
            self.cache.get_frame_within(time_secs, self.open_tolerance_secs)
        };

        Ok(match frame {
            Some(frame) => SkeletonEvent {
                snapshot: self.builder.from_cached(&frame),
                video_time_secs: Some(frame.video_time_secs),
                timestamp_ms: round_time_ms(frame.video_time_secs),
                frame_index: Some(frame.frame_index),
            },
            None => SkeletonEvent {
                snapshot: None,
                video_time_secs: Some(time_secs),
                timestamp_ms: round_time_ms(time_secs),
                frame_index: None,
            },
        })
    }

    fn is_live(&self) -> bool {
        false
    }
}

/// What one processed frame produced downstream
#[derive(Debug, Clone)]
pub struct PipelineUpdate {
    pub skeleton: SkeletonEvent,
    pub checkpoints: Vec<CheckpointEvent>,
    pub rep: Option<RepCountResult>,
}

/// The assembled four-stage pipeline.
///
/// With a non-live transform it runs in playback-only mode: the caller
/// drives it from media-timeline events instead of a frame clock, and only
/// checkpoint/rep side effects are wired.
pub struct RepPipeline {
    transform: Box<dyn SkeletonTransform>,
    form: FormProcessor,
    counter: RepCounter,
    playback_only: bool,
}

impl RepPipeline {
    pub fn new(transform: Box<dyn SkeletonTransform>, definition: ExerciseDefinition) -> Self {
        let playback_only = !transform.is_live();
        let counter = RepCounter::new(definition.criteria.clone());
        Self {
            transform,
            form: FormProcessor::new(definition),
            counter,
            playback_only,
        }
    }

    pub fn playback_only(&self) -> bool {
        self.playback_only
    }

    pub async fn initialize(&self) -> PipelineResult<()> {
        self.transform.initialize().await
    }

    /// Run all four stages for one frame
    pub async fn process_frame(&mut self, event: &FrameEvent) -> PipelineResult<PipelineUpdate> {
        let skeleton = self.transform.transform(event).await?;
        Ok(self.advance(skeleton))
    }

    /// Feed an already-transformed skeleton event, as published by a
    /// skeleton source subscription
    pub fn process_skeleton(&mut self, skeleton: SkeletonEvent) -> PipelineUpdate {
        self.advance(skeleton)
    }

    fn advance(&mut self, skeleton: SkeletonEvent) -> PipelineUpdate {
        // Null skeletons skip downstream state entirely
        let Some(snapshot) = skeleton.snapshot.clone() else {
            return PipelineUpdate {
                skeleton,
                checkpoints: Vec::new(),
                rep: None,
            };
        };

        let checkpoints = self.form.process(&snapshot, skeleton.timestamp_ms);
        let mut rep = None;
        for checkpoint in &checkpoints {
            rep = Some(
                self.counter
                    .process_position(checkpoint.position, checkpoint.candidate.timestamp_ms),
            );
        }
        PipelineUpdate {
            skeleton,
            checkpoints,
            rep,
        }
    }

    /// React to an external media timing event. Seeks break frame
    /// continuity, so cycle candidates are discarded; the rep count is
    /// never rolled back.
    pub fn on_timing_event(&mut self, event: MediaTimingEvent) {
        match event {
            MediaTimingEvent::Seeked { time_secs } => {
                log::debug!("seek to {time_secs:.2}s, clearing cycle state");
                self.form.reset();
            }
            MediaTimingEvent::Playing | MediaTimingEvent::Paused => {}
        }
    }

    pub fn rep_count(&self) -> u32 {
        self.counter.rep_count()
    }

    pub fn rep_progress_percent(&self) -> f32 {
        self.counter.rep_progress_percent()
    }

    /// Full reset of both state machines, for new-media loads
    pub fn reset(&mut self) {
        self.form.reset();
        self.counter.reset();
    }
}

// File-batch skeleton source. On start it fingerprints the media file and
// checks the track store: a hit replays the stored track with zero inference,
// a miss runs a full extraction pass over the decoded frames and persists the
// result for next time.

use crate::core::config::EngineConfig;
use crate::core::pose_cache::{StreamingPoseCache, DEFAULT_NOTIFY_SLOP_MS};
use crate::core::skeleton::SkeletonBuilder;
use crate::core::source::{
    SkeletonEvent, SkeletonFanout, SkeletonSource, SourceError, SourceResult, SourceState,
    StateCell,
};
use crate::core::track_store::{content_fingerprint, TrackStore};
use crate::models::frame::{FrameEvent, FrameResult, PixelFormat};
use crate::models::track::{CachedFrame, Track, TrackMetadata, TRACK_FORMAT_VERSION};
use crate::provider::PoseEstimator;
use async_trait::async_trait;
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Preview thumbnails emitted during extraction are this wide
pub const DEFAULT_PREVIEW_WIDTH: u32 = 160;

/// Frame rate assumed when the stream reports none and frames carry no
/// media time
pub const DEFAULT_FALLBACK_FPS: u32 = 30;

/// Decoded-frame iteration seam. Implementations wrap whatever decodes the
/// media file; `rewind` makes the stream reusable across restarts.
#[async_trait]
pub trait FrameStream: Send + Sync {
    /// Next decoded frame, or `None` past the end
    async fn next_frame(&mut self) -> FrameResult<Option<FrameEvent>>;

    async fn rewind(&mut self) -> FrameResult<()>;

    fn frame_count(&self) -> Option<u32>;

    fn duration_secs(&self) -> Option<f64>;

    fn fps(&self) -> f64;
}

/// Extraction progress, published through a watch channel so late
/// subscribers always see the latest value.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ExtractionProgress {
    /// Identifies one extraction run; changes on every re-extraction
    pub session_id: Option<uuid::Uuid>,
    pub current_frame: u32,
    pub total_frames: Option<u32>,
    pub percent: Option<f32>,
    pub current_time_secs: f64,
    pub total_duration_secs: Option<f64>,
}

impl ExtractionProgress {
    fn idle() -> Self {
        Self {
            session_id: None,
            current_frame: 0,
            total_frames: None,
            percent: None,
            current_time_secs: 0.0,
            total_duration_secs: None,
        }
    }
}

pub struct FileBatchSource {
    media_path: PathBuf,
    stream: Arc<AsyncMutex<Box<dyn FrameStream>>>,
    store: Arc<dyn TrackStore>,
    estimator: Arc<dyn PoseEstimator>,
    builder: SkeletonBuilder,
    preview_width: u32,
    notify_slop_ms: i64,
    fallback_fps: u32,
    cache: std::sync::Mutex<Arc<StreamingPoseCache>>,
    fanout: Arc<SkeletonFanout>,
    state: Arc<StateCell>,
    progress: watch::Sender<ExtractionProgress>,
    preview: Arc<std::sync::Mutex<Option<RgbaImage>>>,
    cancel: AsyncMutex<Option<CancellationToken>>,
    worker: AsyncMutex<Option<JoinHandle<()>>>,
}

impl FileBatchSource {
    pub fn new(
        media_path: PathBuf,
        stream: Box<dyn FrameStream>,
        store: Arc<dyn TrackStore>,
        estimator: Arc<dyn PoseEstimator>,
        builder: SkeletonBuilder,
    ) -> Self {
        let (progress, _) = watch::channel(ExtractionProgress::idle());
        Self {
            media_path,
            stream: Arc::new(AsyncMutex::new(stream)),
            store,
            estimator,
            builder,
            preview_width: DEFAULT_PREVIEW_WIDTH,
            notify_slop_ms: DEFAULT_NOTIFY_SLOP_MS,
            fallback_fps: DEFAULT_FALLBACK_FPS,
            cache: std::sync::Mutex::new(Arc::new(StreamingPoseCache::new())),
            fanout: Arc::new(SkeletonFanout::new()),
            state: Arc::new(StateCell::new()),
            progress,
            preview: Arc::new(std::sync::Mutex::new(None)),
            cancel: AsyncMutex::new(None),
            worker: AsyncMutex::new(None),
        }
    }

    /// Apply engine tunables: preview width, cache notify slop, and the
    /// frame-rate fallback for streams without timing
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.preview_width = config.preview_width;
        self.notify_slop_ms = config.notify_slop_ms;
        self.fallback_fps = config.target_fps;
        self.cache = std::sync::Mutex::new(Arc::new(StreamingPoseCache::with_notify_slop_ms(
            config.notify_slop_ms,
        )));
        self
    }

    /// The cache backing this source. Replaced on every `start`, so callers
    /// doing time-indexed lookups should re-fetch after a restart.
    pub fn cache(&self) -> Arc<StreamingPoseCache> {
        self.cache.lock().unwrap().clone()
    }

    pub fn progress_stream(&self) -> watch::Receiver<ExtractionProgress> {
        self.progress.subscribe()
    }

    /// Most recent extraction preview thumbnail, if any
    pub fn latest_preview(&self) -> Option<RgbaImage> {
        self.preview.lock().unwrap().clone()
    }

    fn usable_track(&self, track: &Track) -> bool {
        if track.metadata.version != TRACK_FORMAT_VERSION {
            log::info!(
                "stored track has format version {}, need {}; re-extracting",
                track.metadata.version,
                TRACK_FORMAT_VERSION
            );
            return false;
        }
        if track.metadata.model_name != self.estimator.model_name() {
            log::info!(
                "stored track was made by model {}, not {}; re-extracting",
                track.metadata.model_name,
                self.estimator.model_name()
            );
            return false;
        }
        true
    }

    /// Replay a stored track to subscribers in frame order
    fn spawn_replay(&self, track: Track) -> JoinHandle<()> {
        let fanout = self.fanout.clone();
        let builder = self.builder;
        tokio::spawn(async move {
            for frame in &track.frames {
                fanout.publish(&SkeletonEvent {
                    snapshot: builder.from_cached(frame),
                    video_time_secs: Some(frame.video_time_secs),
                    timestamp_ms: frame.timestamp_ms,
                    frame_index: Some(frame.frame_index),
                });
            }
            log::info!("replayed {} cached frames", track.frames.len());
        })
    }

    fn spawn_extraction(
        &self,
        source_hash: String,
        total_frames: Option<u32>,
        total_duration_secs: Option<f64>,
        fps: f64,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let stream = self.stream.clone();
        let estimator = self.estimator.clone();
        let builder = self.builder;
        let store = self.store.clone();
        let cache = self.cache();
        let fanout = self.fanout.clone();
        let state = self.state.clone();
        let progress = self.progress.clone();
        let preview = self.preview.clone();
        let preview_width = self.preview_width;

        tokio::spawn(async move {
            let session_id = uuid::Uuid::new_v4();
            log::info!("extraction session {session_id} started");

            let mut stream = stream.lock().await;
            let mut frame_index: u32 = 0;
            let mut last_time_secs: f64 = 0.0;
            let mut width = 0u32;
            let mut height = 0u32;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        // Partial extraction is worthless; throw it away
                        cache.clear();
                        state.set(SourceState::Idle);
                        log::info!("extraction cancelled at frame {frame_index}");
                        return;
                    }
                    next = stream.next_frame() => {
                        let event = match next {
                            Ok(Some(event)) => event,
                            Ok(None) => break,
                            Err(err) => {
                                log::error!("frame decode failed at index {frame_index}: {err}");
                                state.set(SourceState::Error);
                                return;
                            }
                        };

                        let video_time_secs = event
                            .media_time_secs
                            .unwrap_or_else(|| frame_index as f64 / fps.max(1.0));
                        last_time_secs = video_time_secs;
                        width = event.frame.width;
                        height = event.frame.height;

                        let detection = match estimator.estimate(&event.frame).await {
                            Ok(detection) => detection,
                            Err(err) => {
                                log::warn!("inference failed at index {frame_index}: {err}");
                                None
                            }
                        };
                        let snapshot = detection.as_ref().and_then(|d| builder.build(d));

                        let cached = CachedFrame {
                            frame_index,
                            timestamp_ms: event.monotonic_ms,
                            video_time_secs,
                            keypoints: detection.as_ref().map(|d| d.keypoints.clone()).unwrap_or_default(),
                            angles: snapshot.as_ref().map(SkeletonBuilder::angles_of),
                            confidence: detection.as_ref().map(|d| d.score).unwrap_or(0.0),
                        };
                        cache.add_frame(cached);

                        if let Some(thumb) = preview_of(&event, preview_width) {
                            *preview.lock().unwrap() = Some(thumb);
                        }

                        fanout.publish(&SkeletonEvent {
                            snapshot,
                            video_time_secs: Some(video_time_secs),
                            timestamp_ms: event.monotonic_ms,
                            frame_index: Some(frame_index),
                        });

                        frame_index += 1;
                        let percent = total_frames
                            .filter(|total| *total > 0)
                            .map(|total| (frame_index as f32 / total as f32) * 100.0);
                        let _ = progress.send_replace(ExtractionProgress {
                            session_id: Some(session_id),
                            current_frame: frame_index,
                            total_frames,
                            percent,
                            current_time_secs: video_time_secs,
                            total_duration_secs,
                        });
                    }
                }
            }

            let mut metadata = TrackMetadata::new(
                estimator.model_name(),
                estimator.model_version(),
                &source_hash,
            );
            metadata.source_duration_secs = total_duration_secs.unwrap_or(last_time_secs);
            metadata.frame_count = frame_index;
            metadata.fps = fps;
            metadata.width = width;
            metadata.height = height;
            cache.mark_complete(Some(metadata));

            if let Some(track) = cache.to_track() {
                // Persistence failure only costs a re-extraction next time
                if let Err(err) = store.put(&track).await {
                    log::warn!("failed to persist track {source_hash}: {err}");
                }
            }

            state.set(SourceState::Active);
            log::info!("extraction session {session_id} complete: {frame_index} frames");
        })
    }
}

#[async_trait]
impl SkeletonSource for FileBatchSource {
    async fn start(&self) -> SourceResult<()> {
        match self.state.get() {
            SourceState::Idle | SourceState::Error => {}
            _ => return Err(SourceError::AlreadyRunning),
        }
        self.state.set(SourceState::Starting);

        let source_hash = match content_fingerprint(&self.media_path) {
            Ok(hash) => hash,
            Err(err) => {
                self.state.set(SourceState::Error);
                return Err(err.into());
            }
        };

        self.state.set(SourceState::CheckingCache);
        let stored = match self.store.get(&source_hash).await {
            Ok(stored) => stored,
            Err(err) => {
                log::warn!("track store lookup failed for {source_hash}: {err}");
                None
            }
        };

        if let Some(track) = stored.filter(|t| self.usable_track(t)) {
            log::info!(
                "track cache hit for {source_hash} ({} frames)",
                track.frames.len()
            );
            *self.cache.lock().unwrap() = Arc::new(StreamingPoseCache::from_track_with_notify_slop(
                track.clone(),
                self.notify_slop_ms,
            ));
            let handle = self.spawn_replay(track);
            *self.worker.lock().await = Some(handle);
            self.state.set(SourceState::Active);
            return Ok(());
        }

        // Cache miss: the model is only loaded on this path
        if let Err(err) = self.estimator.initialize().await {
            self.state.set(SourceState::Error);
            return Err(SourceError::ProviderUnavailable(err.to_string()));
        }

        let (total_frames, total_duration_secs, fps) = {
            let mut stream = self.stream.lock().await;
            stream.rewind().await?;
            (stream.frame_count(), stream.duration_secs(), stream.fps())
        };
        let fps = if fps > 0.0 {
            fps
        } else {
            self.fallback_fps as f64
        };

        *self.cache.lock().unwrap() =
            Arc::new(StreamingPoseCache::with_notify_slop_ms(self.notify_slop_ms));
        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());

        self.state.set(SourceState::Extracting);
        let handle =
            self.spawn_extraction(source_hash, total_frames, total_duration_secs, fps, token);
        *self.worker.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
        }
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(err) = handle.await {
                log::warn!("file source worker join failed: {err}");
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

    fn skeleton_at(&self, time_secs: f64) -> Option<SkeletonEvent> {
        let cache = self.cache();
        let frame = cache.get_frame(time_secs)?;
        Some(SkeletonEvent {
            snapshot: self.builder.from_cached(&frame),
            video_time_secs: Some(frame.video_time_secs),
            timestamp_ms: frame.timestamp_ms,
            frame_index: Some(frame.frame_index),
        })
    }

    fn has_skeleton_at(&self, time_secs: f64) -> bool {
        self.cache().has_frame(time_secs)
    }
}

/// Downscale a frame into an RGBA preview thumbnail
fn preview_of(event: &FrameEvent, target_width: u32) -> Option<RgbaImage> {
    let frame = &event.frame;
    if frame.width == 0 || frame.height == 0 {
        return None;
    }
    let mut data = frame.data.clone();
    if frame.format == PixelFormat::Bgra8 {
        for px in data.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
    }
    let image = RgbaImage::from_raw(frame.width, frame.height, data)?;
    let target_height =
        ((target_width as f32 / frame.width as f32) * frame.height as f32).max(1.0) as u32;
    Some(image::imageops::thumbnail(
        &image,
        target_width.min(frame.width),
        target_height,
    ))
}

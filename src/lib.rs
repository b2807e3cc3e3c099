pub mod core;
pub mod models;
pub mod provider;

pub use crate::core::config::EngineConfig;
pub use crate::core::file_source::FileBatchSource;
pub use crate::core::live_source::LiveSkeletonSource;
pub use crate::core::pipeline::{CachedTransform, LiveTransform, RepPipeline};
pub use crate::core::pose_cache::StreamingPoseCache;
pub use crate::core::source::{SkeletonEvent, SkeletonSource, SourceState};
pub use crate::core::track_store::{FileTrackStore, MemoryTrackStore, TrackStore};
pub use crate::models::exercise::ExerciseDefinition;
pub use crate::provider::PoseEstimator;

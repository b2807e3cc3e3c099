// Skeleton source abstraction - makes "compute pose now" and "replay pose
// computed earlier" interchangeable to everything downstream

use crate::models::frame::FrameError;
use crate::models::pose::{PoseError, SkeletonSnapshot};
use crate::models::track::TrackError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

/// Lifecycle states shared by both source strategies.
///
/// Only the file-batch strategy visits `CheckingCache`/`Extracting`; the live
/// strategy goes `Idle -> Starting -> Active` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Idle,
    Starting,
    CheckingCache,
    Extracting,
    Active,
    Error,
}

/// One skeleton observation published to subscribers.
///
/// `snapshot` is `None` on a detection miss; downstream stages skip those
/// without updating state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkeletonEvent {
    pub snapshot: Option<SkeletonSnapshot>,
    pub video_time_secs: Option<f64>,
    pub timestamp_ms: i64,
    pub frame_index: Option<u32>,
}

/// Error types for skeleton sources
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source already running")]
    AlreadyRunning,

    #[error("Pose provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Pose error: {0}")]
    Pose(#[from] PoseError),

    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Common contract for both strategies
#[async_trait::async_trait]
pub trait SkeletonSource: Send + Sync {
    /// Begin producing events. Restartable by calling `start` again after
    /// `stop`.
    async fn start(&self) -> SourceResult<()>;

    /// Idempotent; cancels any in-flight work
    async fn stop(&self);

    /// Releases all resources and completes every subscriber stream
    async fn dispose(&self);

    /// New unbounded subscription to the skeleton event sequence
    fn subscribe(&self) -> mpsc::UnboundedReceiver<SkeletonEvent>;

    fn state(&self) -> SourceState;

    /// Watchable state, for callers that need to observe transitions
    fn state_stream(&self) -> watch::Receiver<SourceState>;

    /// Time-indexed lookup; `None` for strategies without a cache (live)
    fn skeleton_at(&self, time_secs: f64) -> Option<SkeletonEvent>;

    fn has_skeleton_at(&self, time_secs: f64) -> bool;
}

/// Push-based fan-out to any number of unbounded subscribers.
///
/// Subscribers that drop their receiver are pruned on the next publish;
/// `close` completes every stream.
pub struct SkeletonFanout {
    senders: Mutex<Vec<mpsc::UnboundedSender<SkeletonEvent>>>,
}

impl Default for SkeletonFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl SkeletonFanout {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SkeletonEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, event: &SkeletonEvent) {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    /// Drop all senders, completing every subscriber stream
    pub fn close(&self) {
        self.senders.lock().unwrap().clear();
    }
}

/// Watchable source-state cell shared between a source and its worker task
pub(crate) struct StateCell {
    tx: watch::Sender<SourceState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SourceState::Idle);
        Self { tx }
    }

    pub fn set(&self, state: SourceState) {
        // send_replace never fails even with no receivers
        let previous = self.tx.send_replace(state);
        if previous != state {
            log::debug!("source state {:?} -> {:?}", previous, state);
        }
    }

    pub fn get(&self) -> SourceState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SourceState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ms: i64) -> SkeletonEvent {
        SkeletonEvent {
            snapshot: None,
            video_time_secs: None,
            timestamp_ms: ms,
            frame_index: None,
        }
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_all_subscribers() {
        let fanout = SkeletonFanout::new();
        let mut a = fanout.subscribe();
        let mut b = fanout.subscribe();

        fanout.publish(&event(1));
        assert_eq!(a.recv().await.unwrap().timestamp_ms, 1);
        assert_eq!(b.recv().await.unwrap().timestamp_ms, 1);
    }

    #[tokio::test]
    async fn test_fanout_prunes_dropped_subscribers() {
        let fanout = SkeletonFanout::new();
        let a = fanout.subscribe();
        let _b = fanout.subscribe();
        drop(a);

        fanout.publish(&event(1));
        assert_eq!(fanout.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_fanout_close_completes_streams() {
        let fanout = SkeletonFanout::new();
        let mut rx = fanout.subscribe();
        fanout.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_state_cell_transitions_observable() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        assert_eq!(cell.get(), SourceState::Idle);

        cell.set(SourceState::Starting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SourceState::Starting);
    }
}

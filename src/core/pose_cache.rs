// Streaming pose cache - time-indexed store of per-frame pose data that an
// extraction producer fills while a playback consumer looks frames up, at
// independent speeds.

use crate::models::track::{CachedFrame, Track, TrackMetadata};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio::time::Duration;

/// How close (ms) a newly added frame must be to a waiter's requested time to
/// resolve it
pub const DEFAULT_NOTIFY_SLOP_MS: i64 = 50;

/// Error types for cache lookups
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache is still being filled and no matching frame arrived in time.
    /// Retryable for this lookup.
    #[error("No frame near {time_secs}s after {waited_ms}ms (extraction in progress)")]
    Timeout { time_secs: f64, waited_ms: u64 },

    /// The cache is sealed and no frame matches. Terminal for this time.
    #[error("No frame at {time_secs}s: extraction complete")]
    NotFound { time_secs: f64 },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Lookup keys are rounded to millisecond precision so near-duplicate
/// timestamps collapse to one slot
pub fn round_time_ms(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}

struct Waiter {
    id: u64,
    time_ms: i64,
    tx: oneshot::Sender<CachedFrame>,
}

#[derive(Default)]
struct CacheInner {
    frames: HashMap<i64, CachedFrame>,
    /// Sorted rounded-ms keys, maintained by binary-search insertion
    index: Vec<i64>,
    complete: bool,
    metadata: Option<TrackMetadata>,
    waiters: Vec<Waiter>,
    next_waiter_id: u64,
}

impl CacheInner {
    fn nearest_key(&self, time_ms: i64) -> Option<i64> {
        if self.index.is_empty() {
            return None;
        }
        match self.index.binary_search(&time_ms) {
            Ok(pos) => Some(self.index[pos]),
            Err(pos) => {
                // Candidates straddle the insertion point; out-of-span times
                // clamp to the first/last recorded frame
                if pos == 0 {
                    Some(self.index[0])
                } else if pos == self.index.len() {
                    Some(self.index[self.index.len() - 1])
                } else {
                    let before = self.index[pos - 1];
                    let after = self.index[pos];
                    if (time_ms - before) <= (after - time_ms) {
                        Some(before)
                    } else {
                        Some(after)
                    }
                }
            }
        }
    }

    fn lookup_within(&self, time_ms: i64, tolerance_ms: Option<i64>) -> Option<CachedFrame> {
        let key = self.nearest_key(time_ms)?;
        if let Some(tol) = tolerance_ms {
            if (key - time_ms).abs() > tol {
                return None;
            }
        }
        self.frames.get(&key).cloned()
    }
}

/// Content-addressed, time-indexed store of per-frame pose data.
///
/// A cache is *open* while its producer may still add frames and *sealed*
/// after `mark_complete`; sealing fails all outstanding waiters. All interior
/// state is guarded by one mutex that is never held across an await point.
pub struct StreamingPoseCache {
    inner: Mutex<CacheInner>,
    notify_slop_ms: i64,
}

impl Default for StreamingPoseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingPoseCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            notify_slop_ms: DEFAULT_NOTIFY_SLOP_MS,
        }
    }

    pub fn with_notify_slop_ms(notify_slop_ms: i64) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            notify_slop_ms,
        }
    }

    /// Build a pre-populated, pre-sealed cache from a persisted track
    pub fn from_track(track: Track) -> Self {
        Self::from_track_with_notify_slop(track, DEFAULT_NOTIFY_SLOP_MS)
    }

    pub fn from_track_with_notify_slop(mut track: Track, notify_slop_ms: i64) -> Self {
        track.normalize();
        let cache = Self::with_notify_slop_ms(notify_slop_ms);
        {
            let mut inner = cache.inner.lock().unwrap();
            for frame in track.frames {
                let key = round_time_ms(frame.video_time_secs);
                if inner.frames.contains_key(&key) {
                    continue;
                }
                if let Err(pos) = inner.index.binary_search(&key) {
                    inner.index.insert(pos, key);
                }
                inner.frames.insert(key, frame);
            }
            inner.complete = true;
            inner.metadata = Some(track.metadata);
        }
        cache
    }

    /// Store a frame keyed by its rounded video time and notify any waiters
    /// near that time. Out-of-order additions are tolerated; a write landing
    /// on an occupied slot is ignored (frames are immutable once written).
    pub fn add_frame(&self, frame: CachedFrame) {
        let key = round_time_ms(frame.video_time_secs);
        let mut inner = self.inner.lock().unwrap();
        if inner.complete {
            log::warn!("add_frame on sealed cache ignored (t={}s)", frame.video_time_secs);
            return;
        }
        if inner.frames.contains_key(&key) {
            log::debug!("duplicate cache slot {}ms ignored", key);
            return;
        }
        if let Err(pos) = inner.index.binary_search(&key) {
            inner.index.insert(pos, key);
        }
        inner.frames.insert(key, frame.clone());

        let slop = self.notify_slop_ms;
        let mut remaining = Vec::new();
        for waiter in inner.waiters.drain(..) {
            if (waiter.time_ms - key).abs() <= slop {
                // Receiver may have timed out already; nothing to do then
                let _ = waiter.tx.send(frame.clone());
            } else {
                remaining.push(waiter);
            }
        }
        inner.waiters = remaining;
    }

    /// Nearest-frame lookup. Empty cache returns `None`; times outside the
    /// recorded span clamp to the first/last frame.
    pub fn get_frame(&self, time_secs: f64) -> Option<CachedFrame> {
        let inner = self.inner.lock().unwrap();
        inner.lookup_within(round_time_ms(time_secs), None)
    }

    /// Nearest-frame lookup that rejects matches farther than `tolerance_secs`
    pub fn get_frame_within(&self, time_secs: f64, tolerance_secs: f64) -> Option<CachedFrame> {
        let inner = self.inner.lock().unwrap();
        inner.lookup_within(
            round_time_ms(time_secs),
            Some(round_time_ms(tolerance_secs)),
        )
    }

    /// True when a frame exists within the notify slop of the requested time
    pub fn has_frame(&self, time_secs: f64) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .lookup_within(round_time_ms(time_secs), Some(self.notify_slop_ms))
            .is_some()
    }

    pub fn frame_count(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().unwrap().complete
    }

    pub fn metadata(&self) -> Option<TrackMetadata> {
        self.inner.lock().unwrap().metadata.clone()
    }

    /// All frames sorted by frame index
    pub fn all_frames(&self) -> Vec<CachedFrame> {
        let inner = self.inner.lock().unwrap();
        let mut frames: Vec<CachedFrame> = inner.frames.values().cloned().collect();
        frames.sort_by_key(|f| f.frame_index);
        frames
    }

    /// Wait until a frame near `time_secs` is available.
    ///
    /// Resolves immediately on a hit; fails with `CacheError::NotFound` when
    /// the cache is sealed without a match, and with `CacheError::Timeout`
    /// when the deadline passes while the cache is still open.
    pub async fn wait_for_frame(
        &self,
        time_secs: f64,
        timeout: Duration,
    ) -> CacheResult<CachedFrame> {
        let key = round_time_ms(time_secs);
        let (waiter_id, rx) = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(frame) = inner.lookup_within(key, Some(self.notify_slop_ms)) {
                return Ok(frame);
            }
            if inner.complete {
                return Err(CacheError::NotFound { time_secs });
            }
            let (tx, rx) = oneshot::channel();
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            inner.waiters.push(Waiter {
                id,
                time_ms: key,
                tx,
            });
            (id, rx)
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            // Sender dropped: the cache was sealed with no matching frame
            Ok(Err(_)) => Err(CacheError::NotFound { time_secs }),
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                inner.waiters.retain(|w| w.id != waiter_id);
                Err(CacheError::Timeout {
                    time_secs,
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Seal the cache: merge final metadata, then resolve or fail every
    /// outstanding waiter. No writes are accepted afterwards.
    pub fn mark_complete(&self, metadata: Option<TrackMetadata>) {
        let mut inner = self.inner.lock().unwrap();
        inner.complete = true;
        if metadata.is_some() {
            inner.metadata = metadata;
        }
        let slop = self.notify_slop_ms;
        let waiters = std::mem::take(&mut inner.waiters);
        for waiter in waiters {
            match inner.lookup_within(waiter.time_ms, Some(slop)) {
                Some(frame) => {
                    let _ = waiter.tx.send(frame);
                }
                // Dropping the sender fails the waiter with the sealed error
                None => drop(waiter.tx),
            }
        }
        log::info!("pose cache sealed with {} frames", inner.frames.len());
    }

    /// Discard all frames and waiters, reopening the cache (reset / new media)
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.frames.clear();
        inner.index.clear();
        inner.complete = false;
        inner.metadata = None;
        // Pending waiters can never be satisfied by the discarded contents
        inner.waiters.clear();
    }

    /// Snapshot the cache as a serialized track; `None` when empty
    pub fn to_track(&self) -> Option<Track> {
        let inner = self.inner.lock().unwrap();
        if inner.frames.is_empty() {
            return None;
        }
        let frames: Vec<CachedFrame> = inner.frames.values().cloned().collect();
        let metadata = inner
            .metadata
            .clone()
            .unwrap_or_else(|| TrackMetadata::new("unknown", "0", ""));
        Some(Track::new(metadata, frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pose::{Keypoint, KeypointName};

    fn frame(index: u32, secs: f64) -> CachedFrame {
        CachedFrame {
            frame_index: index,
            timestamp_ms: (secs * 1000.0) as i64,
            video_time_secs: secs,
            keypoints: vec![Keypoint::new(KeypointName::Nose, 0.5, 0.1, 0.9)],
            angles: None,
            confidence: 0.8,
        }
    }

    fn seeded_cache() -> StreamingPoseCache {
        let cache = StreamingPoseCache::new();
        for (i, secs) in [0.0, 0.5, 1.0, 1.5].iter().enumerate() {
            cache.add_frame(frame(i as u32, *secs));
        }
        cache
    }

    #[test]
    fn test_exact_lookup_returns_added_frame() {
        let cache = seeded_cache();
        for secs in [0.0, 0.5, 1.0, 1.5] {
            let got = cache.get_frame(secs).unwrap();
            assert_eq!(got.video_time_secs, secs);
        }
    }

    #[test]
    fn test_nearest_and_clamped_lookups() {
        let cache = seeded_cache();
        assert_eq!(cache.get_frame(0.52).unwrap().video_time_secs, 0.5);
        assert!(cache.get_frame_within(0.7, 0.1).is_none());
        assert_eq!(cache.get_frame(-1.0).unwrap().video_time_secs, 0.0);
        assert_eq!(cache.get_frame(5.0).unwrap().video_time_secs, 1.5);
    }

    #[test]
    fn test_empty_cache_lookups() {
        let cache = StreamingPoseCache::new();
        assert!(cache.get_frame(0.0).is_none());
        assert!(!cache.has_frame(0.0));
        assert_eq!(cache.frame_count(), 0);
        assert!(cache.to_track().is_none());
    }

    #[test]
    fn test_insertion_order_independence() {
        let times = [1.2, 0.1, 0.9, 0.4, 2.0, 1.7, 0.0, 1.0];
        let in_order = StreamingPoseCache::new();
        let shuffled = StreamingPoseCache::new();
        for (i, secs) in times.iter().enumerate() {
            in_order.add_frame(frame(i as u32, *secs));
        }
        for (i, secs) in times.iter().enumerate().rev() {
            shuffled.add_frame(frame(i as u32, *secs));
        }

        // Lookups agree with a linear scan regardless of insertion order
        let mut sorted: Vec<f64> = times.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for query in [0.0, 0.05, 0.3, 0.55, 1.05, 1.95, 3.0, -0.5] {
            let linear = sorted
                .iter()
                .min_by_key(|t| (round_time_ms(**t) - round_time_ms(query)).abs())
                .copied()
                .unwrap();
            assert_eq!(in_order.get_frame(query).unwrap().video_time_secs, linear);
            assert_eq!(shuffled.get_frame(query).unwrap().video_time_secs, linear);
        }
    }

    #[test]
    fn test_duplicate_slot_ignored() {
        let cache = StreamingPoseCache::new();
        cache.add_frame(frame(0, 0.5));
        // Rounds to the same millisecond slot; first write wins
        cache.add_frame(frame(7, 0.5001));
        assert_eq!(cache.frame_count(), 1);
        assert_eq!(cache.get_frame(0.5).unwrap().frame_index, 0);
    }

    #[tokio::test]
    async fn test_wait_resolves_immediately_on_hit() {
        let cache = seeded_cache();
        let got = cache
            .wait_for_frame(0.5, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(got.video_time_secs, 0.5);
    }

    #[tokio::test]
    async fn test_wait_resolved_by_later_add() {
        let cache = std::sync::Arc::new(StreamingPoseCache::new());
        let writer = cache.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.add_frame(frame(0, 2.0));
        });
        let got = cache
            .wait_for_frame(2.01, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(got.frame_index, 0);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_times_out_while_open() {
        let cache = StreamingPoseCache::new();
        cache.add_frame(frame(0, 0.0));
        let err = cache
            .wait_for_frame(9.0, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Timeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_wait_fails_fast_on_sealed_cache() {
        let cache = StreamingPoseCache::new();
        cache.add_frame(frame(0, 0.0));
        cache.mark_complete(None);
        let err = cache
            .wait_for_frame(9.0, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_sealing_fails_pending_waiters() {
        let cache = std::sync::Arc::new(StreamingPoseCache::new());
        let sealer = cache.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sealer.mark_complete(None);
        });
        let err = cache
            .wait_for_frame(1.0, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }), "{err}");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sealing_resolves_matching_waiters() {
        let cache = std::sync::Arc::new(StreamingPoseCache::new());
        let producer = cache.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            // A racing add can land between the waiter registering and the
            // seal; the seal must still hand the matching frame over
            {
                let mut inner = producer.inner.lock().unwrap();
                let f = frame(0, 3.0);
                let key = round_time_ms(f.video_time_secs);
                inner.index.push(key);
                inner.frames.insert(key, f);
            }
            producer.mark_complete(None);
        });
        let got = cache
            .wait_for_frame(3.0, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(got.frame_index, 0);
        handle.await.unwrap();
    }

    #[test]
    fn test_track_round_trip_preserves_lookups() {
        let cache = seeded_cache();
        cache.mark_complete(Some(TrackMetadata::new("m", "1", "hash")));
        let track = cache.to_track().unwrap();
        assert_eq!(track.metadata.frame_count, 4);

        let restored = StreamingPoseCache::from_track(track);
        assert!(restored.is_complete());
        assert_eq!(restored.frame_count(), cache.frame_count());
        for secs in [0.0, 0.5, 1.0, 1.5] {
            assert_eq!(
                restored.get_frame(secs).unwrap().frame_index,
                cache.get_frame(secs).unwrap().frame_index
            );
        }
    }

    #[test]
    fn test_all_frames_sorted_by_index() {
        let cache = StreamingPoseCache::new();
        cache.add_frame(frame(2, 0.2));
        cache.add_frame(frame(0, 0.0));
        cache.add_frame(frame(1, 0.1));
        let indices: Vec<u32> = cache.all_frames().iter().map(|f| f.frame_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_clear_reopens_cache() {
        let cache = seeded_cache();
        cache.mark_complete(None);
        cache.clear();
        assert!(!cache.is_complete());
        assert_eq!(cache.frame_count(), 0);
        cache.add_frame(frame(0, 0.0));
        assert_eq!(cache.frame_count(), 1);
    }

    #[test]
    fn test_sealed_cache_rejects_writes() {
        let cache = seeded_cache();
        cache.mark_complete(None);
        cache.add_frame(frame(9, 9.0));
        assert_eq!(cache.frame_count(), 4);
    }
}

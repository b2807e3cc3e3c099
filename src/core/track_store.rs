// Track persistence - stores extracted tracks keyed by a content fingerprint
// of the source media

use crate::models::track::{Track, TrackError, TrackResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Bytes sampled from each region of the file for fingerprinting
const FINGERPRINT_CHUNK_BYTES: usize = 64 * 1024;

/// External persistence seam for extracted tracks.
///
/// The key is a fast content fingerprint of the source media, not a
/// cryptographic identity.
#[async_trait]
pub trait TrackStore: Send + Sync {
    async fn get(&self, content_hash: &str) -> TrackResult<Option<Track>>;

    async fn put(&self, track: &Track) -> TrackResult<()>;
}

/// Fast fingerprint of a media file: length plus sampled head/middle/tail
/// chunks. Distinguishes by content rather than filename; collisions are
/// acceptable at the cache-key level.
pub fn content_fingerprint(path: &Path) -> TrackResult<String> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    len.hash(&mut hasher);

    let mut buf = vec![0u8; FINGERPRINT_CHUNK_BYTES];
    let offsets = [
        0u64,
        len.saturating_sub(FINGERPRINT_CHUNK_BYTES as u64) / 2,
        len.saturating_sub(FINGERPRINT_CHUNK_BYTES as u64),
    ];
    for offset in offsets {
        file.seek(SeekFrom::Start(offset))?;
        let read = file.read(&mut buf)?;
        buf[..read].hash(&mut hasher);
        if read < FINGERPRINT_CHUNK_BYTES {
            break;
        }
    }

    Ok(format!("{:016x}", hasher.finish()))
}

/// File-backed track store: one JSON document per fingerprint under a base
/// directory
pub struct FileTrackStore {
    base_path: PathBuf,
}

impl FileTrackStore {
    pub fn new(base_path: PathBuf) -> TrackResult<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn track_path(&self, content_hash: &str) -> TrackResult<PathBuf> {
        // Fingerprints are hex; reject anything that could escape base_path
        if content_hash.is_empty() || !content_hash.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TrackError::StoreFailed(format!(
                "invalid content hash: {:?}",
                content_hash
            )));
        }
        Ok(self.base_path.join(format!("{}.track.json", content_hash)))
    }
}

#[async_trait]
impl TrackStore for FileTrackStore {
    async fn get(&self, content_hash: &str) -> TrackResult<Option<Track>> {
        let path = self.track_path(content_hash)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(&path).await?;
        let track = Track::from_json(&json)?;
        log::debug!(
            "loaded track {} ({} frames)",
            content_hash,
            track.frames.len()
        );
        Ok(Some(track))
    }

    async fn put(&self, track: &Track) -> TrackResult<()> {
        let path = self.track_path(&track.metadata.source_hash)?;
        let json = track.to_json()?;
        tokio::fs::write(&path, json).await?;
        log::info!(
            "persisted track {} ({} frames) to {}",
            track.metadata.source_hash,
            track.frames.len(),
            path.display()
        );
        Ok(())
    }
}

/// In-memory track store for tests and embedding
#[derive(Default)]
pub struct MemoryTrackStore {
    tracks: Mutex<HashMap<String, Track>>,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackStore for MemoryTrackStore {
    async fn get(&self, content_hash: &str) -> TrackResult<Option<Track>> {
        Ok(self.tracks.lock().await.get(content_hash).cloned())
    }

    async fn put(&self, track: &Track) -> TrackResult<()> {
        self.tracks
            .lock()
            .await
            .insert(track.metadata.source_hash.clone(), track.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pose::{Keypoint, KeypointName};
    use crate::models::track::{CachedFrame, TrackMetadata};

    fn sample_track(hash: &str) -> Track {
        let frames = vec![CachedFrame {
            frame_index: 0,
            timestamp_ms: 0,
            video_time_secs: 0.0,
            keypoints: vec![Keypoint::new(KeypointName::Nose, 0.5, 0.1, 0.9)],
            angles: None,
            confidence: 0.9,
        }];
        Track::new(TrackMetadata::new("m", "1", hash), frames)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("reptrack_test_store")
            .join(format!("{}_{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let store = FileTrackStore::new(scratch_dir("round_trip")).unwrap();
        let track = sample_track("abc123");

        assert!(store.get("abc123").await.unwrap().is_none());
        store.put(&track).await.unwrap();
        let loaded = store.get("abc123").await.unwrap().unwrap();
        assert_eq!(loaded.metadata.source_hash, "abc123");
        assert_eq!(loaded.frames.len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_rejects_bad_hash() {
        let store = FileTrackStore::new(scratch_dir("bad_hash")).unwrap();
        let err = store.get("../escape").await.unwrap_err();
        assert!(matches!(err, TrackError::StoreFailed(_)));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryTrackStore::new();
        store.put(&sample_track("deadbeef")).await.unwrap();
        assert!(store.get("deadbeef").await.unwrap().is_some());
        assert!(store.get("feedface").await.unwrap().is_none());
    }

    #[test]
    fn test_fingerprint_depends_on_content() {
        let dir = scratch_dir("fingerprint");
        let a = dir.join("a.bin");
        let b = dir.join("b.bin");
        let c = dir.join("c.bin");
        std::fs::write(&a, vec![1u8; 2048]).unwrap();
        std::fs::write(&b, vec![1u8; 2048]).unwrap();
        std::fs::write(&c, vec![2u8; 2048]).unwrap();

        let fa = content_fingerprint(&a).unwrap();
        let fb = content_fingerprint(&b).unwrap();
        let fc = content_fingerprint(&c).unwrap();
        assert_eq!(fa, fb, "same bytes, same fingerprint");
        assert_ne!(fa, fc, "different bytes, different fingerprint");
        assert_eq!(fa.len(), 16);
    }

    #[test]
    fn test_fingerprint_missing_file_is_io_error() {
        let missing = std::env::temp_dir().join("reptrack_no_such_file.bin");
        let err = content_fingerprint(&missing).unwrap_err();
        assert!(matches!(err, TrackError::Io(_)));
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration. Every empirically tuned threshold in the pipeline
/// lives here rather than as a hard-coded constant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Where extracted tracks are persisted
    pub track_dir: PathBuf,
    /// Keypoints below this confidence are treated as not visible (0.0-1.0)
    pub visibility_threshold: f32,
    /// Cache waiters resolve for frames within this distance, milliseconds
    pub notify_slop_ms: i64,
    /// Default timeout for blocking cache waits, milliseconds
    pub default_wait_timeout_ms: u64,
    /// Cached-transform lookup window while extraction is open, milliseconds
    pub extraction_tolerance_ms: u64,
    /// Live capture tick interval, milliseconds
    pub capture_interval_ms: u64,
    /// Width of extraction preview thumbnails, pixels
    pub preview_width: u32,
    /// Nominal frame rate assumed when the media carries no timing
    pub target_fps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());

        let mut track_dir = PathBuf::from(home);
        track_dir.push(".reptrack");
        track_dir.push("tracks");

        Self {
            track_dir,
            visibility_threshold: 0.2,
            notify_slop_ms: 50,
            default_wait_timeout_ms: 2_000,
            extraction_tolerance_ms: 100,
            capture_interval_ms: 33,
            preview_width: 160,
            target_fps: 30,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path, creating it with defaults
    /// if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(0.0..=1.0).contains(&self.visibility_threshold) {
            return Err(format!(
                "Invalid visibility threshold: {}. Must be between 0.0 and 1.0",
                self.visibility_threshold
            )
            .into());
        }

        if !(0..=1_000).contains(&self.notify_slop_ms) {
            return Err(format!(
                "Invalid notify slop: {} ms. Must be between 0 and 1000",
                self.notify_slop_ms
            )
            .into());
        }

        if self.default_wait_timeout_ms == 0 || self.default_wait_timeout_ms > 60_000 {
            return Err(format!(
                "Invalid wait timeout: {} ms. Must be between 1 and 60000",
                self.default_wait_timeout_ms
            )
            .into());
        }

        if self.extraction_tolerance_ms > 5_000 {
            return Err(format!(
                "Invalid extraction tolerance: {} ms. Must be at most 5000",
                self.extraction_tolerance_ms
            )
            .into());
        }

        if self.capture_interval_ms == 0 || self.capture_interval_ms > 1_000 {
            return Err(format!(
                "Invalid capture interval: {} ms. Must be between 1 and 1000",
                self.capture_interval_ms
            )
            .into());
        }

        if !(16..=1_024).contains(&self.preview_width) {
            return Err(format!(
                "Invalid preview width: {}. Must be between 16 and 1024",
                self.preview_width
            )
            .into());
        }

        if self.target_fps == 0 || self.target_fps > 120 {
            return Err(format!(
                "Invalid target FPS: {}. Must be between 1 and 120",
                self.target_fps
            )
            .into());
        }

        Ok(())
    }

    /// Reset the default path to default configuration
    pub fn reset() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::default();
        config.save()?;
        Ok(config)
    }

    /// Skeleton builder honoring the configured visibility threshold
    pub fn skeleton_builder(&self) -> crate::core::skeleton::SkeletonBuilder {
        crate::core::skeleton::SkeletonBuilder::new(self.visibility_threshold)
    }

    pub fn capture_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.capture_interval_ms)
    }

    /// Cached-transform open-phase tolerance as seconds
    pub fn open_tolerance_secs(&self) -> f64 {
        self.extraction_tolerance_ms as f64 / 1000.0
    }

    /// The default configuration file path
    fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| "Could not determine home directory")?;

        let mut path = PathBuf::from(home);
        path.push(".reptrack");
        path.push("config.json");
        Ok(path)
    }
}

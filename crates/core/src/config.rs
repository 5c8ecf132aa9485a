//! Configuration for document stability detection and page capture

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tuning knobs for the stability detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Minimum similarity (0-1) for a sample to count as stable (default: 0.88)
    pub threshold: f64,

    /// Consecutive stable samples required before capturing (default: 3, ~0.6s at 5 Hz)
    pub stable_frame_count: u32,

    /// Quiet period after a capture in milliseconds (default: 2500)
    pub cooldown_ms: u64,

    /// Sampling cadence in milliseconds (default: 200, i.e. 5 Hz)
    pub sample_interval_ms: u64,

    /// Width of the downscaled analysis frame (default: 160)
    pub analysis_width: u32,

    /// Height of the downscaled analysis frame (default: 120)
    pub analysis_height: u32,

    /// JPEG quality for captured pages, 1-100 (default: 85)
    pub jpeg_quality: u8,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.88,
            stable_frame_count: 3,
            cooldown_ms: 2500,
            sample_interval_ms: 200,
            analysis_width: 160,
            analysis_height: 120,
            jpeg_quality: 85,
        }
    }
}

impl StabilityConfig {
    /// Cooldown window as a duration
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Sampling interval as a duration
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `threshold` is not in range 0-1
    /// - `stable_frame_count` is zero
    /// - `sample_interval_ms` is zero
    /// - either analysis dimension is zero
    /// - `jpeg_quality` is not in range 1-100
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidConfig(format!(
                "threshold must be in range 0-1, got {}",
                self.threshold
            )));
        }

        if self.stable_frame_count == 0 {
            return Err(Error::InvalidConfig(
                "stable_frame_count must be at least 1".to_string(),
            ));
        }

        if self.sample_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sample_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.analysis_width == 0 || self.analysis_height == 0 {
            return Err(Error::InvalidConfig(format!(
                "analysis resolution must be non-zero, got {}x{}",
                self.analysis_width, self.analysis_height
            )));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(Error::InvalidConfig(format!(
                "jpeg_quality must be in range 1-100, got {}",
                self.jpeg_quality
            )));
        }

        Ok(())
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: StabilityConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

//! Capture configuration.
//!
//! Fixed focus, fixed exposure and fixed frame timing keep frame-to-frame
//! geometry and brightness stable for downstream tracking. Auto-focus and
//! auto-exposure are off by default and the request builder only writes the
//! manual values when the matching auto mode is disabled.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A device-advertised `(min, max)` frames-per-second pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FpsRange {
    /// Lower bound in frames per second.
    pub min: i32,
    /// Upper bound in frames per second.
    pub max: i32,
}

impl FpsRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Returns true if `0 < min <= max`.
    pub fn is_valid(&self) -> bool {
        self.min > 0 && self.min <= self.max
    }
}

impl fmt::Display for FpsRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Parameters applied to every repeating capture request.
///
/// Once a session is configured with a snapshot of this struct the snapshot
/// is never mutated; changing a field means closing and reopening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfiguration {
    /// Fixed lens focus distance in diopters (hyperfocal-tuned).
    pub focus_distance_diopters: f32,
    /// Fixed sensor exposure time in nanoseconds.
    pub exposure_time_nanos: i64,
    /// Fixed sensor frame duration in nanoseconds.
    pub frame_duration_nanos: i64,
    /// Explicit target frame-rate range. When absent the fastest range the
    /// device advertises is used.
    pub target_fps_range: Option<FpsRange>,
    /// Fixed sensor sensitivity (ISO). Left to the device when absent.
    pub sensitivity_iso: Option<i32>,
    pub auto_exposure_enabled: bool,
    pub auto_focus_enabled: bool,
    pub auto_white_balance_enabled: bool,
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            focus_distance_diopters: 0.333,
            // Short exposure limits rolling-shutter skew.
            exposure_time_nanos: 8_000_000,
            frame_duration_nanos: 16_666_668, // 60 fps
            target_fps_range: None,
            sensitivity_iso: None,
            auto_exposure_enabled: false,
            auto_focus_enabled: false,
            auto_white_balance_enabled: true,
        }
    }
}

impl CaptureConfiguration {
    /// Creates a configuration with a fixed exposure time.
    pub fn with_exposure(exposure_time_nanos: i64) -> Self {
        Self {
            exposure_time_nanos,
            ..Default::default()
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.focus_distance_diopters.is_finite() || self.focus_distance_diopters < 0.0 {
            return Err(ConfigError::InvalidFocusDistance(self.focus_distance_diopters));
        }
        if self.exposure_time_nanos <= 0 {
            return Err(ConfigError::InvalidExposure(self.exposure_time_nanos));
        }
        if self.frame_duration_nanos <= 0 {
            return Err(ConfigError::InvalidFrameDuration(self.frame_duration_nanos));
        }
        if self.exposure_time_nanos > self.frame_duration_nanos {
            return Err(ConfigError::ExposureExceedsFrameDuration {
                exposure: self.exposure_time_nanos,
                frame_duration: self.frame_duration_nanos,
            });
        }
        if let Some(range) = self.target_fps_range {
            if !range.is_valid() {
                return Err(ConfigError::InvalidFpsRange(range));
            }
        }
        if let Some(iso) = self.sensitivity_iso {
            if iso <= 0 {
                return Err(ConfigError::InvalidSensitivity(iso));
            }
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid focus distance {0} (must be finite and non-negative)")]
    InvalidFocusDistance(f32),
    #[error("invalid exposure time {0}ns")]
    InvalidExposure(i64),
    #[error("invalid frame duration {0}ns")]
    InvalidFrameDuration(i64),
    #[error("exposure time {exposure}ns exceeds frame duration {frame_duration}ns")]
    ExposureExceedsFrameDuration { exposure: i64, frame_duration: i64 },
    #[error("invalid fps range {0} (need 0 < min <= max)")]
    InvalidFpsRange(FpsRange),
    #[error("invalid sensitivity {0}")]
    InvalidSensitivity(i32),
    #[error("invalid session settings: {0}")]
    InvalidSession(String),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub capture: CaptureConfiguration,
    #[serde(default)]
    pub session: SessionSettings,
}

/// Device and output settings that sit next to the capture parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Camera device identifier.
    pub device_id: String,
    /// Output image width in pixels.
    pub width: u32,
    /// Output image height in pixels.
    pub height: u32,
    /// Number of buffers in the output image pool.
    pub pool_depth: usize,
    /// Name given to the worker thread.
    pub worker_name: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            device_id: "0".to_string(),
            width: 640,
            height: 480,
            pool_depth: 1,
            worker_name: "camera-worker".to_string(),
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::InvalidSession("empty device id".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidSession("zero image dimensions".into()));
        }
        if self.pool_depth == 0 {
            return Err(ConfigError::InvalidSession("pool depth must be at least 1".into()));
        }
        Ok(())
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.capture.validate()?;
        config.session.validate()?;
        Ok(config)
    }
}

//! Tunables for capture sessions.
//!
//! Every field has a default matching the limits of a stock browser, so an
//! empty JSON object (or no config file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{CaptureError, Result};

/// Largest canvas edge, in device pixels.
pub const MAX_CANVAS_DIMENSION: u32 = 32767;
/// Largest canvas area, in device pixels.
pub const MAX_CANVAS_AREA: u64 = 472_907_776;
/// Native captures glitch on large areas; tiles are kept below these.
pub const NATIVE_TILE_WIDTH: u32 = 4095;
pub const NATIVE_TILE_HEIGHT: u32 = 16383;
/// Per-format edge limits of the encoders.
pub const JPEG_MAX_DIMENSION: u64 = 65535;
pub const PNG_MAX_DIMENSION: u64 = 2_147_483_647;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: Limits,
    /// Blur applied to every tile. Zero disables blurring and the
    /// oversampling that compensates for it.
    pub blur_radius: f32,
    /// Keep the alpha channel in PNG output.
    pub alpha: bool,
    /// Default JPEG quality (1-100).
    pub jpeg_quality: u8,
    /// Outline every tile in the output (debugging seams).
    pub debug_tiles: bool,
    pub locks: LockConfig,
    /// Upper bound for one raw-buffer encode.
    pub encode_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_dimension: u32,
    pub max_area: u64,
    pub native_tile_width: u32,
    pub native_tile_height: u32,
    pub jpeg_max_dimension: u64,
    pub png_max_dimension: u64,
    /// Largest raw RGBA buffer we are willing to allocate, in bytes.
    pub max_buffer_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub target_lock_ms: u64,
    pub encoder_lock_ms: u64,
    pub retry_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            blur_radius: 0.0,
            alpha: false,
            jpeg_quality: 92,
            debug_tiles: false,
            locks: LockConfig::default(),
            encode_timeout_ms: 15 * 60 * 1000,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_dimension: MAX_CANVAS_DIMENSION,
            max_area: MAX_CANVAS_AREA,
            native_tile_width: NATIVE_TILE_WIDTH,
            native_tile_height: NATIVE_TILE_HEIGHT,
            jpeg_max_dimension: JPEG_MAX_DIMENSION,
            png_max_dimension: PNG_MAX_DIMENSION,
            max_buffer_bytes: isize::MAX as u64,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            target_lock_ms: 5 * 60 * 1000,
            encoder_lock_ms: 15 * 60 * 1000,
            retry_interval_ms: 1000,
        }
    }
}

impl LockConfig {
    pub fn target_lock_time(&self) -> Duration {
        Duration::from_millis(self.target_lock_ms)
    }

    pub fn encoder_lock_time(&self) -> Duration {
        Duration::from_millis(self.encoder_lock_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Config {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| CaptureError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&data)
            .map_err(|e| CaptureError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let l = &self.limits;
        if l.max_dimension == 0 || l.max_area == 0 {
            return Err(CaptureError::Config("canvas limits must be non-zero".into()));
        }
        if l.native_tile_width == 0 || l.native_tile_height == 0 {
            return Err(CaptureError::Config("native tile caps must be non-zero".into()));
        }
        if !(self.blur_radius >= 0.0 && self.blur_radius.is_finite()) {
            return Err(CaptureError::Config(format!(
                "blur_radius must be a finite non-negative number, got {}",
                self.blur_radius
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(CaptureError::Config(format!(
                "jpeg_quality must be within 1-100, got {}",
                self.jpeg_quality
            )));
        }
        if self.locks.retry_interval_ms == 0 {
            return Err(CaptureError::Config("lock retry interval must be non-zero".into()));
        }
        Ok(())
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_millis(self.encode_timeout_ms)
    }
}

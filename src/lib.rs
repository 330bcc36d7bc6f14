//! Shutterbug: a live camera feed served as an MJPEG multipart stream, with
//! capture controls that can be inspected and changed while clients watch.
//!
//! The moving parts, leaf to root:
//! - [`capture::FrameBuffer`] hands the latest encoded frame to every waiting client
//! - [`capture::CaptureSession`] owns the camera and encoder and feeds the buffer
//! - [`controls::ControlRegistry`] holds the typed, bounded control values
//! - [`modes::ModePreset`] applies named bundles of control values
//! - [`server`] mounts the relays and the control API on an axum router

pub mod capture;
pub mod controls;
pub mod error;
pub mod modes;
pub mod server;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{CaptureSession, Frame, FrameBuffer, PixelFormat};
pub use controls::ControlRegistry;
pub use error::{Error, Result};
pub use modes::ModePreset;

/// Environment prefix for configuration overrides, e.g. `SHUTTERBUG_SERVER__PORT`.
pub const ENV_PREFIX: &str = "SHUTTERBUG";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub modes: ModeConfig,
}

/// Which camera capability backs the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureBackend {
    V4l2,
    #[cfg(feature = "test-pattern")]
    TestPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    /// Device node; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// JPEG quality, 1..=100
    pub quality: u8,
    pub buffer_count: u32,
}

impl CaptureConfig {
    /// Same configuration with a different encoder quality.
    pub fn with_quality(&self, quality: u8) -> Self {
        Self {
            quality,
            ..self.clone()
        }
    }

    /// Frame duration limits in microseconds derived from the target frame rate.
    pub fn frame_duration_limits(&self) -> [i64; 2] {
        if self.fps == 0 {
            return [0, 0];
        }
        let us = 1_000_000 / self.fps as i64;
        [us, us]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Pause between frames sent to one client, in seconds
    pub frame_delay: f64,
}

impl StreamConfig {
    pub fn frame_delay(&self) -> Duration {
        Duration::from_secs_f64(self.frame_delay.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Time given to auto exposure / white balance after a reset to defaults
    pub settle_delay_ms: u64,
}

impl ModeConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
            modes: ModeConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::V4l2,
            device: "/dev/video0".into(),
            width: 1296,
            height: 972,
            fps: 30,
            format: PixelFormat::Mjpeg,
            quality: 75,
            buffer_count: 4,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8888,
            title: "Shutterbug".into(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { frame_delay: 0.1 }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1000,
        }
    }
}

impl Config {
    /// Layer defaults, an optional config file and `SHUTTERBUG_*` environment
    /// variables (nested keys separated by `__`).
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("shutterbug").required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

//! Server settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `config/engagement.toml`, then `ENGAGEMENT__*` environment variables
//! (`ENGAGEMENT__SERVER__PORT=9000`, `ENGAGEMENT__CAMERA__DEVICE=./footage`).

use camera_capture::CameraConfig;
use config::{Config, ConfigError, Environment, File};
use engagement::EngagementConfig;
use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitConfig;

/// Default settings file, extension optional
pub const DEFAULT_SETTINGS_FILE: &str = "config/engagement";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin; `*` allows any
    pub cors_origin: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origin: "*".to_string(),
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Live preview source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Directory of replay frames; no device means no live preview
    pub device: Option<String>,
    pub fps: u32,
    pub looping: bool,
    pub jpeg_quality: u8,
}

impl Default for CameraSettings {
    fn default() -> Self {
        let defaults = CameraConfig::default();
        Self {
            device: None,
            fps: defaults.fps,
            looping: defaults.looping,
            jpeg_quality: defaults.jpeg_quality,
        }
    }
}

impl CameraSettings {
    pub fn camera_config(&self) -> Option<CameraConfig> {
        let device = self.device.as_ref()?;
        Some(CameraConfig {
            device: device.clone(),
            fps: self.fps,
            looping: self.looping,
            jpeg_quality: self.jpeg_quality,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Serve Prometheus metrics at `/metrics`
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Complete server settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub camera: CameraSettings,
    pub rate_limit: RateLimitConfig,
    pub metrics: MetricsSettings,
    pub engagement: EngagementConfig,
}

impl Settings {
    /// Load from the default settings file and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_SETTINGS_FILE)
    }

    /// Load from `path` (missing file is fine) and the environment
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("ENGAGEMENT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

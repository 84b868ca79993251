//! # Configuration Management Module
//!
//! Persistent pipeline settings stored in platform-appropriate locations.
//! Handles loading, saving, validating and providing defaults.
//!
//! ## Sections
//! - `[stream]`: resample interval
//! - `[connection]`: stale threshold, reconnect cap and delay
//! - `[preprocessor]`: EWMA factor and trend window
//! - `[zones]`: zone boundaries
//! - `[activity]`: activity detection thresholds
//! - `[recorder]`: batch size and pending store location
//! - `[latency]`: latency thresholds and report location
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/lanepulse/config.toml
//! - Linux: ~/.config/lanepulse/config.toml
//! - Windows: %APPDATA%\lanepulse\config.toml
//!
//! ## Why TOML
//! Human-readable format allows manual editing. Every field has a default,
//! so a partial file only overrides what it names.

use crate::activity::ActivityDetectionConfig;
use crate::controller::ReconnectPolicy;
use crate::error::ConfigError;
use crate::latency::LatencyThresholds;
use crate::preprocessor::PreprocessorConfig;
use crate::zones::ZoneModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub resample_interval_secs: f64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            resample_interval_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub stale_emission_threshold: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_secs: f64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            stale_emission_threshold: 3,
            max_reconnect_attempts: 3,
            reconnect_delay_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneSettings {
    pub boundaries: Vec<f64>,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            boundaries: vec![120.0, 140.0, 160.0, 180.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySettings {
    pub baseline_bpm: f64,
    pub delta_on: f64,
    pub delta_off: f64,
    pub min_active_duration_secs: f64,
    pub min_pause_duration_secs: f64,
    pub active_zone_threshold: usize,
    pub recovery_trend_threshold: f64,
    pub recovery_slope_window_secs: f64,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            baseline_bpm: 70.0,
            delta_on: 30.0,
            delta_off: 15.0,
            min_active_duration_secs: 8.0,
            min_pause_duration_secs: 10.0,
            active_zone_threshold: 2,
            recovery_trend_threshold: -0.5,
            recovery_slope_window_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub max_batch_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_store_path: Option<PathBuf>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 120,
            pending_store_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencySettings {
    pub warning_secs: f64,
    pub critical_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

impl Default for LatencySettings {
    fn default() -> Self {
        Self {
            warning_secs: 2.0,
            critical_secs: 5.0,
            report_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamSettings,
    pub connection: ConnectionSettings,
    pub preprocessor: PreprocessorConfig,
    pub zones: ZoneSettings,
    pub activity: ActivitySettings,
    pub recorder: RecorderSettings,
    pub latency: LatencySettings,
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lanepulse")
            .join("config.toml")
    }

    /// Load config from the default location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, writing defaults there if the file is missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, writing defaults", path.display());
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let alpha = self.preprocessor.ewma_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "preprocessor.ewma_alpha must be in (0, 1], got {}",
                alpha
            )));
        }
        positive("stream.resample_interval_secs", self.stream.resample_interval_secs)?;
        positive("preprocessor.trend_window_secs", self.preprocessor.trend_window_secs)?;
        positive("connection.reconnect_delay_secs", self.connection.reconnect_delay_secs)?;
        if self.connection.stale_emission_threshold == 0 {
            return Err(ConfigError::Invalid(
                "connection.stale_emission_threshold must be at least 1".to_string(),
            ));
        }
        if self.latency.critical_secs < self.latency.warning_secs {
            return Err(ConfigError::Invalid(
                "latency.critical_secs must not be below latency.warning_secs".to_string(),
            ));
        }
        self.zone_model()?;
        Ok(())
    }

    pub fn resample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.stream.resample_interval_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            stale_emission_threshold: self.connection.stale_emission_threshold,
            max_reconnect_attempts: self.connection.max_reconnect_attempts,
            reconnect_delay: Duration::from_secs_f64(self.connection.reconnect_delay_secs),
        }
    }

    pub fn zone_model(&self) -> Result<ZoneModel, ConfigError> {
        ZoneModel::new(self.zones.boundaries.clone())
            .map_err(|e| ConfigError::Invalid(format!("zones.boundaries: {}", e)))
    }

    pub fn activity_config(&self) -> Result<ActivityDetectionConfig, ConfigError> {
        let activity = &self.activity;
        Ok(ActivityDetectionConfig {
            baseline_bpm: activity.baseline_bpm,
            delta_on: activity.delta_on,
            delta_off: activity.delta_off,
            min_active_duration: activity.min_active_duration_secs,
            min_pause_duration: activity.min_pause_duration_secs,
            active_zone_threshold: activity.active_zone_threshold,
            recovery_trend_threshold: activity.recovery_trend_threshold,
            recovery_slope_window: activity.recovery_slope_window_secs,
            zone_model: self.zone_model()?,
        })
    }

    pub fn latency_thresholds(&self) -> LatencyThresholds {
        LatencyThresholds {
            warning_secs: self.latency.warning_secs,
            critical_secs: self.latency.critical_secs,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be positive, got {}", name, value)))
    }
}

/*!
Configuration management for the head mouse.
*/

use crate::actuator::ActuatorSettings;
use crate::controller::{Axis, InactivePolicy};
use crate::pointer::Rect;
use crate::sensor::SensorInfo;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shared::protocol::DEFAULT_MAX_FRAME_LEN;
use shared::{AxisCalibration, SpeedOrigin};
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sensor: SensorConfig,
    pub heading: AxisConfig,
    pub vertical: AxisConfig,
    pub control: ControlConfig,
    pub pointer: PointerConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            sensor: SensorConfig::default(),
            heading: AxisConfig {
                offset: 0,
                null_half_width: 10,
                limit_half_width: 20,
                speed: 1.0,
            },
            vertical: AxisConfig {
                offset: 0,
                null_half_width: 20,
                limit_half_width: 30,
                speed: 1.0,
            },
            control: ControlConfig::default(),
            pointer: PointerConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        self.heading.calibration().context("[heading]")?;
        self.vertical.calibration().context("[vertical]")?;
        if self.sensor.baud == 0 {
            bail!("[sensor] baud must be greater than zero");
        }
        if self.sensor.max_frame_len == 0 {
            bail!("[sensor] max_frame_len must be greater than zero");
        }
        if self.pointer.tick_ms == 0 {
            bail!("[pointer] tick_ms must be greater than zero");
        }
        if let Some(screen) = self.pointer.screen {
            if screen.width <= 0 || screen.height <= 0 {
                bail!("[pointer] screen must have a positive size");
            }
        }
        Ok(())
    }

    pub fn sensor_info(&self) -> SensorInfo {
        SensorInfo {
            port: self.sensor.port.clone(),
            baud: self.sensor.baud,
            name: self.sensor.name.clone(),
            swap_lr: self.sensor.swap_lr,
            swap_ud: self.sensor.swap_ud,
            max_frame_len: self.sensor.max_frame_len,
            log_raw_frames: self.sensor.log_raw_frames,
        }
    }

    pub fn actuator_settings(&self) -> ActuatorSettings {
        ActuatorSettings {
            tick: Duration::from_millis(self.pointer.tick_ms),
            out_of_position_tolerance: self.pointer.out_of_position_tolerance,
            out_of_position_threshold: self.pointer.out_of_position_threshold,
            release_timeout: Duration::from_millis(self.pointer.release_timeout_ms),
            screen: self.pointer.screen,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Serial sensor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Serial device, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,

    pub baud: u32,

    /// Display name used in logs
    pub name: String,

    /// Sensor worn with buttons on the left
    pub swap_lr: bool,

    /// Sensor worn upside down
    pub swap_ud: bool,

    /// Log every raw frame at debug level
    pub log_raw_frames: bool,

    /// Longest frame accepted without a delimiter
    pub max_frame_len: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: 9600,
            name: "headmouse".to_string(),
            swap_lr: true,
            swap_ud: true,
            log_raw_frames: false,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// One axis: `offset` is the centre, the half widths bound the dead band
/// and the active band, `speed` scales the commanded pixels per second
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub offset: i64,
    pub null_half_width: i64,
    pub limit_half_width: i64,
    pub speed: f64,
}

impl AxisConfig {
    pub fn calibration(&self) -> shared::Result<AxisCalibration> {
        AxisCalibration::new(self.offset, self.null_half_width, self.limit_half_width)
    }

    /// Validated calibration together with the speed factor
    pub fn axis(&self) -> shared::Result<Axis> {
        Ok(Axis::new(self.calibration()?, self.speed))
    }
}

/// Controller behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub inactive_policy: InactivePolicy,

    pub speed_origin: SpeedOrigin,

    /// Engage pointer control as soon as the sensor connects
    pub auto_engage: bool,

    /// Jump the pointer to the screen centre when engaging
    pub centre_on_engage: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            inactive_policy: InactivePolicy::Hold,
            speed_origin: SpeedOrigin::Center,
            auto_engage: true,
            centre_on_engage: false,
        }
    }
}

/// Actuator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerConfig {
    /// Tick period in milliseconds
    pub tick_ms: u64,

    /// Pixels the real pointer may drift before it counts as moved by hand
    pub out_of_position_tolerance: i32,

    /// Consecutive drifted ticks before control is handed back
    pub out_of_position_threshold: u32,

    /// Longest a disengage waits for the buttons to be released
    pub release_timeout_ms: u64,

    /// Confine the pointer to this area instead of the main display
    pub screen: Option<Rect>,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 30,
            out_of_position_tolerance: 2,
            out_of_position_threshold: 3,
            release_timeout_ms: 500,
            screen: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_roundtrip() {
        let mut original_config = AppConfig::new();
        original_config.pointer.screen = Some(Rect::new(0, 0, 1920, 1080));
        original_config.control.inactive_policy = InactivePolicy::Stop;

        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        original_config.save_to_file(temp_path).unwrap();
        let loaded_config = AppConfig::load_from_file(temp_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::new();

        assert_eq!(config.sensor.port, "/dev/ttyUSB0");
        assert_eq!(config.sensor.baud, 9600);
        assert!(config.sensor.swap_lr);
        assert_eq!(config.heading.null_half_width, 10);
        assert_eq!(config.vertical.limit_half_width, 30);
        assert_eq!(config.control.inactive_policy, InactivePolicy::Hold);
        assert_eq!(config.control.speed_origin, SpeedOrigin::Center);
        assert_eq!(config.pointer.tick_ms, 30);
        assert!(config.pointer.screen.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "[sensor]\nport = \"COM3\"\n\n[control]\nspeed_origin = \"null_boundary\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.sensor.port, "COM3");
        assert_eq!(config.sensor.baud, 9600);
        assert_eq!(config.control.speed_origin, SpeedOrigin::NullBoundary);
        assert_eq!(config.heading, AppConfig::new().heading);
    }

    #[test]
    fn test_invalid_calibration_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "[heading]\noffset = 0\nnull_half_width = 30\nlimit_half_width = 20\nspeed = 1.0\n",
        )
        .unwrap();

        let err = AppConfig::load_from_file(temp_file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("limit half width 20"));
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let mut config = AppConfig::new();
        config.pointer.tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_conversion() {
        let config = AppConfig::new();
        let settings = config.actuator_settings();
        assert_eq!(settings.tick, Duration::from_millis(30));
        assert_eq!(settings.release_timeout, Duration::from_millis(500));

        let heading = config.heading.axis().unwrap();
        assert_eq!(heading.calibration.limit_half_width(), 20);
        assert_eq!(heading.speed, 1.0);

        let info = config.sensor_info();
        assert_eq!(info.port, "/dev/ttyUSB0");
        assert_eq!(info.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }
}

//! Configuration loaded with `figment`.
//!
//! Sources, highest precedence last:
//! 1. built-in defaults
//! 2. a TOML file (`config/dmr-tester.toml` unless another path is given)
//! 3. environment variables prefixed with `DMRTEST_`, nested keys separated
//!    by `__`
//!
//! ```text
//! DMRTEST_APPLICATION__LANGUAGE=ru
//! DMRTEST_DEVICE__PATH=/dev/ttyACM0
//! DMRTEST_TIMING__PLL_LOCK_TIMEOUT_MS=800
//! ```

use crate::i18n::Language;
use crate::transport::LinkSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/dmr-tester.toml";
/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DMRTEST_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::LoadError(Box::new(err))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub device: DeviceSettings,
    pub timing: TimingSettings,
    pub calibration: CalibrationSettings,
    pub model: ModelSettings,
    pub orchestrator: OrchestratorSettings,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Operator language for task messages and labels.
    #[serde(default)]
    pub language: Language,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Start with packet-level diagnostics enabled.
    #[serde(default)]
    pub debug: bool,
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Fixed device path; discovered by USB id when absent.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Serial read timeout.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Interval between `STATUS` polls while waiting for a status bit.
    #[serde(default = "default_status_poll_ms")]
    pub status_poll_ms: u64,
}

/// Device timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Time the device needs for DC offset calibration.
    #[serde(default = "default_calibration_settle_ms")]
    pub calibration_settle_ms: u64,
    /// Time allowed for a PLL to report lock.
    #[serde(default = "default_pll_lock_timeout_ms")]
    pub pll_lock_timeout_ms: u64,
}

/// Output power calibration copied into tasks holding the reference
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// Attenuation at which the reference power was measured, dB.
    #[serde(default = "default_ref_attenuation")]
    pub ref_attenuation: f64,
    /// Reference output power, dBm.
    #[serde(default = "default_ref_output_power")]
    pub ref_output_power: f64,
}

/// Recorded I/Q samples for the DMR input model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub i_samples: Option<PathBuf>,
    #[serde(default)]
    pub q_samples: Option<PathBuf>,
}

/// Orchestrator channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Capacity of the controller → orchestrator channel.
    #[serde(default = "default_control_capacity")]
    pub control_capacity: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout_ms() -> u64 {
    3000
}

fn default_status_poll_ms() -> u64 {
    100
}

fn default_calibration_settle_ms() -> u64 {
    1000
}

fn default_pll_lock_timeout_ms() -> u64 {
    600
}

fn default_ref_attenuation() -> f64 {
    31.5
}

fn default_ref_output_power() -> f64 {
    1.0
}

fn default_control_capacity() -> usize {
    32
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            language: Language::default(),
            log_level: default_log_level(),
            debug: false,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            path: None,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            status_poll_ms: default_status_poll_ms(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            calibration_settle_ms: default_calibration_settle_ms(),
            pll_lock_timeout_ms: default_pll_lock_timeout_ms(),
        }
    }
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            ref_attenuation: default_ref_attenuation(),
            ref_output_power: default_ref_output_power(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            control_capacity: default_control_capacity(),
        }
    }
}

impl Settings {
    /// Load from the default file location and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.device.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "Baud rate must be positive".to_string(),
            ));
        }
        if self.device.read_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Serial read timeout must be positive".to_string(),
            ));
        }
        if self.device.status_poll_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Status poll interval must be positive".to_string(),
            ));
        }
        if self.timing.pll_lock_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "PLL lock timeout must be positive; zero would wait forever".to_string(),
            ));
        }
        if self.orchestrator.control_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "Control channel capacity must be positive".to_string(),
            ));
        }
        if !self.calibration.ref_attenuation.is_finite()
            || !self.calibration.ref_output_power.is_finite()
        {
            return Err(ConfigError::ValidationError(
                "Calibration values must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Port settings for the connection registry.
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            baud_rate: self.device.baud_rate,
            read_timeout: Duration::from_millis(self.device.read_timeout_ms),
            poll_interval: Duration::from_millis(self.device.status_poll_ms),
            pll_lock_timeout: Duration::from_millis(self.timing.pll_lock_timeout_ms),
        }
    }
}

impl TimingSettings {
    /// DC calibration settle time.
    pub fn calibration_settle(&self) -> Duration {
        Duration::from_millis(self.calibration_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_missing_file_gives_defaults() {
        let settings = Settings::load_from("/nonexistent/dmr-tester.toml").expect("defaults");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.device.baud_rate, 115_200);
        assert_eq!(settings.timing.pll_lock_timeout_ms, 600);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
[application]
language = "ru"
log_level = "debug"

[device]
path = "/dev/ttyACM0"

[calibration]
ref_attenuation = 20.0
ref_output_power = 2.5
"#
        )
        .expect("write");

        let settings = Settings::load_from(file.path()).expect("valid config");
        assert_eq!(settings.application.language, Language::Ru);
        assert_eq!(settings.device.path.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(settings.device.read_timeout_ms, 3000);
        assert_eq!(settings.calibration.ref_attenuation, 20.0);
        assert_eq!(settings.link_settings().pll_lock_timeout, Duration::from_millis(600));
    }

    #[test]
    #[serial]
    fn test_invalid_log_level_rejected() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "[application]\nlog_level = \"loud\"").expect("write");
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }
}

//! Application settings using Figment
//!
//! Settings are loaded from:
//! 1. `config/smart_lpm.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `SMART_LPM_`, with `__` separating
//!    the section from the key
//!
//! Every field has a default, so a missing file yields a working configuration.
//!
//! # Example
//! ```no_run
//! use smart_lpm::config::Settings;
//!
//! // SMART_LPM_CALIBRATION__NOISE_TOLERANCE=0.02 overrides the file
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Data directory: {}", settings.storage.data_dir.display());
//! # Ok::<(), smart_lpm::error::LpmError>(())
//! ```

use crate::error::{AppResult, LpmError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/smart_lpm.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// File locations
    #[serde(default)]
    pub storage: StorageSettings,
    /// Which power sensor to drive
    #[serde(default)]
    pub sensor: SensorSettings,
    /// Calibration run parameters
    #[serde(default)]
    pub calibration: CalibrationSettings,
    /// Live acquisition parameters
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Simulated sensor parameters
    #[serde(default)]
    pub simulation: SimulationSettings,
    /// Output file options
    #[serde(default)]
    pub export: ExportSettings,
}

/// Application-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// File locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Output directory for raw and split data files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Process (plan) file loaded at startup
    #[serde(default = "default_process_file")]
    pub process_file: PathBuf,
}

/// Sensor selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSettings {
    /// `simulated` or `newport_1830c`
    #[serde(default = "default_sensor_kind")]
    pub kind: String,
    /// Serial port of a hardware sensor
    #[serde(default = "default_serial_port")]
    pub port: String,
}

/// Calibration run parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// Measurement time per wavelength in seconds
    #[serde(default = "default_calibration_duration")]
    pub duration_s: f64,
    /// Averaging window in seconds
    #[serde(default = "default_calibration_window")]
    pub average_window_s: f64,
    /// Nominal power setting in percent
    #[serde(default = "default_nominal_power")]
    pub nominal_power_pct: u32,
    /// Largest accepted standard deviation of a calibration series
    #[serde(default = "default_noise_tolerance")]
    pub noise_tolerance: f64,
}

/// Live acquisition parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Delay after selecting a wavelength before readings are taken
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Pause between consecutive sensor readings inside an averaging window
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Detector wavelength in blind mode; the plan's first wavelength when unset
    #[serde(default)]
    pub wavelength: Option<u32>,
    /// Power setting recorded with blind-mode samples; the plan's first when unset
    #[serde(default)]
    pub setting: Option<u32>,
    /// Detection threshold in mW
    #[serde(default)]
    pub threshold: f64,
    /// Classify samples as they arrive
    #[serde(default = "default_true")]
    pub dynamic_reassignment: bool,
    /// Apply calibration factors while classifying
    #[serde(default)]
    pub dynamic_correction: bool,
}

/// Mean reading of the simulated sensor at one wavelength
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavelengthResponse {
    /// Wavelength in nm
    pub wavelength: u32,
    /// Mean reading in mW
    pub mean_mw: f64,
}

/// Simulated sensor parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Mean reading in mW
    #[serde(default = "default_simulation_mean")]
    pub mean_mw: f64,
    /// Standard deviation of the gaussian noise in mW
    #[serde(default = "default_simulation_spread")]
    pub spread_mw: f64,
    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
    /// Per-wavelength mean overrides
    #[serde(default)]
    pub response: Vec<WavelengthResponse>,
    /// Replay the plan's signature during acquisitions
    #[serde(default = "default_true")]
    pub playback: bool,
}

/// Output file options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Write one file per (wavelength, power) instead of per wavelength
    #[serde(default)]
    pub split_by_power: bool,
    /// Drop samples at pulse edges from split files
    #[serde(default = "default_true")]
    pub exclude_transitions: bool,
    /// Prefix file names with the acquisition time (`YYYYmmdd-HHMM_`)
    #[serde(default = "default_true")]
    pub timestamp_prefix: bool,
}

// Default value functions
fn default_name() -> String {
    "Smart LPM".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_process_file() -> PathBuf {
    PathBuf::from("config/process.tsv")
}

fn default_sensor_kind() -> String {
    "simulated".to_string()
}

fn default_serial_port() -> String {
    "/dev/ttyS0".to_string()
}

fn default_calibration_duration() -> f64 {
    5.0
}

fn default_calibration_window() -> f64 {
    1.0
}

fn default_nominal_power() -> u32 {
    80
}

fn default_noise_tolerance() -> f64 {
    0.01
}

fn default_settle_delay() -> u64 {
    500
}

fn default_poll_interval() -> u64 {
    10
}

fn default_simulation_mean() -> f64 {
    3.5
}

fn default_simulation_spread() -> f64 {
    0.05
}

fn default_true() -> bool {
    true
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            process_file: default_process_file(),
        }
    }
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            kind: default_sensor_kind(),
            port: default_serial_port(),
        }
    }
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            duration_s: default_calibration_duration(),
            average_window_s: default_calibration_window(),
            nominal_power_pct: default_nominal_power(),
            noise_tolerance: default_noise_tolerance(),
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            poll_interval_ms: default_poll_interval(),
            wavelength: None,
            setting: None,
            threshold: 0.0,
            dynamic_reassignment: true,
            dynamic_correction: false,
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            mean_mw: default_simulation_mean(),
            spread_mw: default_simulation_spread(),
            seed: None,
            response: Vec::new(),
            playback: true,
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            split_by_power: false,
            exclude_transitions: true,
            timestamp_prefix: true,
        }
    }
}

impl Settings {
    /// Load settings from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific file path (which may be absent)
    ///
    /// Environment variables can override any key, e.g.
    /// `SMART_LPM_APPLICATION__LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SMART_LPM_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let valid_sensors = ["simulated", "newport_1830c"];
        if !valid_sensors.contains(&self.sensor.kind.as_str()) {
            return Err(invalid(format!(
                "Invalid sensor kind '{}'. Must be one of: {}",
                self.sensor.kind,
                valid_sensors.join(", ")
            )));
        }

        let calibration = &self.calibration;
        if !(calibration.duration_s > 0.0) || !(calibration.average_window_s > 0.0) {
            return Err(invalid(
                "Calibration duration and averaging window must be positive".to_string(),
            ));
        }
        if calibration.average_window_s > calibration.duration_s {
            return Err(invalid(format!(
                "Calibration averaging window {}s exceeds the duration {}s",
                calibration.average_window_s, calibration.duration_s
            )));
        }
        if calibration.nominal_power_pct == 0 || calibration.nominal_power_pct > 100 {
            return Err(invalid(format!(
                "Invalid nominal_power_pct {}. Must be 1-100",
                calibration.nominal_power_pct
            )));
        }
        if !(calibration.noise_tolerance >= 0.0) {
            return Err(invalid("Noise tolerance cannot be negative".to_string()));
        }

        if self.acquisition.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be at least 1".to_string()));
        }
        if !self.acquisition.threshold.is_finite() {
            return Err(invalid("Threshold must be finite".to_string()));
        }

        if !(self.simulation.spread_mw >= 0.0) {
            return Err(invalid("Simulation spread cannot be negative".to_string()));
        }

        Ok(())
    }

    /// Render the effective settings as TOML
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| LpmError::Configuration(e.to_string()))
    }
}

fn invalid(message: String) -> LpmError {
    LpmError::Configuration(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.calibration.duration_s, 5.0);
        assert_eq!(settings.calibration.average_window_s, 1.0);
        assert_eq!(settings.calibration.nominal_power_pct, 80);
        assert_eq!(settings.calibration.noise_tolerance, 0.01);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.storage, StorageSettings::default());
        assert_eq!(settings.sensor.kind, "simulated");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smart_lpm.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[calibration]
noise_tolerance = 0.05

[[simulation.response]]
wavelength = 561
mean_mw = 4.2
"#
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.application.name, "Smart LPM");
        assert_eq!(settings.calibration.noise_tolerance, 0.05);
        assert_eq!(settings.calibration.duration_s, 5.0);
        assert_eq!(
            settings.simulation.response,
            vec![WavelengthResponse {
                wavelength: 561,
                mean_mw: 4.2
            }]
        );
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "invalid".to_string();
        assert!(matches!(
            settings.validate(),
            Err(LpmError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_calibration_window() {
        let mut settings = Settings::default();
        settings.calibration.average_window_s = 10.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.calibration.nominal_power_pct = 120;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_renders_toml() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("[calibration]"));
        assert!(rendered.contains("noise_tolerance"));
    }
}

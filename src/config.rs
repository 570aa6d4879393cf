//! Configuration management for Hestia
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Every device limit and tuning constant the
//! core uses lives here so it is loaded once at startup.

use crate::error::{HestiaError, Result};
use crate::power::{PhaseMode, RoundingMode, VoltageType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Charger connection parameters
    pub device: DeviceConfig,

    /// Poll timer configuration
    pub polling: PollingConfig,

    /// Absolute hardware bounds used by the validator
    pub limits: LimitsConfig,

    /// Energy accounting thresholds
    pub energy: EnergyConfig,

    /// Electrical installation used for power to current conversion
    pub charging: ChargingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Key-value store location
    pub store: StoreConfig,

    /// IANA timezone used for monthly/yearly period boundaries
    pub timezone: String,
}

/// Charger connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Identifier used in logs and store keys
    pub id: String,

    /// Hostname or IP address of the wallbox
    pub host: String,

    /// HTTP port (typically 80)
    pub port: u16,

    /// Hard timeout for a single request in milliseconds
    pub request_timeout_ms: u64,

    /// Consecutive failures after which the device counts as unreachable
    pub max_consecutive_errors: u32,

    /// Reuse window for the last good snapshot in milliseconds
    pub cache_freshness_ms: u64,

    /// Continuous outage after which the device is reported unavailable
    pub unavailable_after_secs: u64,
}

/// Poll timer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Requested interval between ticks in seconds
    pub interval_secs: u64,

    /// Floor applied to `interval_secs` to protect the charger
    pub min_interval_secs: u64,
}

/// Absolute hardware bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Minimum charging current in amperes
    pub intensity_min: f64,

    /// Maximum charging current in amperes
    pub intensity_max: f64,

    /// Minimum installation voltage
    pub voltage_min: f64,

    /// Maximum installation voltage
    pub voltage_max: f64,

    /// Lower bound for any reported power in watts
    pub power_min: f64,

    /// Upper bound for any reported power in watts
    pub power_max: f64,
}

/// Energy accounting thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Largest plausible change between two readings in kWh
    pub max_energy_delta_kwh: f64,

    /// Drop of the device counter tolerated before it counts as a reset
    pub reset_tolerance_kwh: f64,
}

/// Electrical installation description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargingConfig {
    /// Single or three phase supply
    pub phase_mode: PhaseMode,

    /// How the nominal voltage is measured on three phase supplies
    pub voltage_type: VoltageType,

    /// Nominal supply voltage used in conversions
    pub nominal_voltage: f64,

    /// Rounding applied to computed currents
    pub rounding: RoundingMode,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level override
    pub console_level: Option<String>,

    /// Optional file-specific level override
    pub file_level: Option<String>,

    /// Path to log file or log directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Key-value store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the JSON file backing the store
    pub path: String,
}

impl PollingConfig {
    /// Interval actually used by the poll timer
    pub fn effective_interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(self.min_interval_secs))
    }
}

impl DeviceConfig {
    /// Base URL of the charger's HTTP API
    pub fn base_url(&self) -> String {
        if self.port == 80 {
            format!("http://{}", self.host)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_freshness(&self) -> Duration {
        Duration::from_millis(self.cache_freshness_ms)
    }

    pub fn unavailable_after(&self) -> Duration {
        Duration::from_secs(self.unavailable_after_secs)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "hestia_config.yaml",
            "/data/hestia_config.yaml",
            "/etc/hestia/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parsed timezone for period boundaries
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone.parse::<chrono_tz::Tz>().map_err(|e| {
            HestiaError::validation("timezone".to_string(), format!("{}: {}", self.timezone, e))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.device.host.trim().is_empty() {
            return Err(HestiaError::validation(
                "device.host",
                "Host cannot be empty",
            ));
        }

        if self.device.port == 0 {
            return Err(HestiaError::validation(
                "device.port",
                "Port must be greater than 0",
            ));
        }

        if self.device.request_timeout_ms == 0 {
            return Err(HestiaError::validation(
                "device.request_timeout_ms",
                "Must be greater than 0",
            ));
        }

        if self.device.max_consecutive_errors == 0 {
            return Err(HestiaError::validation(
                "device.max_consecutive_errors",
                "Must be greater than 0",
            ));
        }

        if self.polling.min_interval_secs == 0 {
            return Err(HestiaError::validation(
                "polling.min_interval_secs",
                "Must be greater than 0",
            ));
        }

        let l = &self.limits;
        if !(l.intensity_min > 0.0 && l.intensity_min <= l.intensity_max) {
            return Err(HestiaError::validation(
                "limits.intensity_min",
                "Must be positive and not above intensity_max",
            ));
        }
        if !(l.voltage_min > 0.0 && l.voltage_min <= l.voltage_max) {
            return Err(HestiaError::validation(
                "limits.voltage_min",
                "Must be positive and not above voltage_max",
            ));
        }
        if l.power_min > l.power_max {
            return Err(HestiaError::validation(
                "limits.power_min",
                "Must not be above power_max",
            ));
        }

        if !(self.energy.max_energy_delta_kwh.is_finite() && self.energy.max_energy_delta_kwh > 0.0)
        {
            return Err(HestiaError::validation(
                "energy.max_energy_delta_kwh",
                "Must be positive",
            ));
        }
        if !(self.energy.reset_tolerance_kwh.is_finite() && self.energy.reset_tolerance_kwh >= 0.0)
        {
            return Err(HestiaError::validation(
                "energy.reset_tolerance_kwh",
                "Must not be negative",
            ));
        }

        let v = self.charging.nominal_voltage;
        if !(v >= l.voltage_min && v <= l.voltage_max) {
            return Err(HestiaError::validation(
                "charging.nominal_voltage".to_string(),
                format!("Must lie within {}..{} V", l.voltage_min, l.voltage_max),
            ));
        }

        self.tz()?;

        Ok(())
    }
}

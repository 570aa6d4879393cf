//! Power to charging-current conversion
//!
//! Used when the host asks for a target charge power instead of a current.
//! The power factor is taken as 1 and the result is clamped to the charger's
//! settable range.

use crate::config::Config;
use crate::error::{HestiaError, Result};
use crate::logging::get_logger;
use serde::{Deserialize, Serialize};

/// Supply phase configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    Single,
    Three,
}

/// How a three phase nominal voltage is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageType {
    LineToLine,
    LineToNeutral,
}

/// Rounding applied to a computed current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Round half away from zero
    Math,
    Floor,
    Ceil,
}

impl RoundingMode {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            RoundingMode::Math => value.round(),
            RoundingMode::Floor => value.floor(),
            RoundingMode::Ceil => value.ceil(),
        }
    }
}

const POWER_FACTOR: f64 = 1.0;

/// Converts a power target into a settable current
#[derive(Debug, Clone)]
pub struct CurrentCalculator {
    pub phase_mode: PhaseMode,
    pub voltage_type: VoltageType,
    pub voltage: f64,
    pub rounding: RoundingMode,
    pub min_amps: f64,
    pub max_amps: f64,
}

impl CurrentCalculator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            phase_mode: config.charging.phase_mode,
            voltage_type: config.charging.voltage_type,
            voltage: config.charging.nominal_voltage,
            rounding: config.charging.rounding,
            min_amps: config.limits.intensity_min,
            max_amps: config.limits.intensity_max,
        }
    }

    /// Limit the upper bound, e.g. to the charger's reported max intensity
    pub fn with_max_amps(mut self, max_amps: f64) -> Self {
        if max_amps.is_finite() && max_amps >= self.min_amps {
            self.max_amps = max_amps.min(self.max_amps);
        }
        self
    }

    /// Current in amperes needed to draw `power_w`, clamped to the settable range
    pub fn current_for_power(&self, power_w: f64) -> Result<f64> {
        if !power_w.is_finite() {
            return Err(HestiaError::validation(
                "power_w".to_string(),
                format!("not a finite number: {}", power_w),
            ));
        }
        if !(self.voltage.is_finite() && self.voltage > 0.0) {
            return Err(HestiaError::validation(
                "voltage".to_string(),
                format!("must be positive: {}", self.voltage),
            ));
        }

        let power = power_w.abs();
        let raw = match (self.phase_mode, self.voltage_type) {
            (PhaseMode::Single, _) => power / (POWER_FACTOR * self.voltage),
            (PhaseMode::Three, VoltageType::LineToLine) => {
                power / (3f64.sqrt() * POWER_FACTOR * self.voltage)
            }
            (PhaseMode::Three, VoltageType::LineToNeutral) => {
                power / (3.0 * POWER_FACTOR * self.voltage)
            }
        };

        let rounded = self.rounding.apply(raw);
        let clamped = rounded.clamp(self.min_amps, self.max_amps);

        get_logger("power").debug(&format!(
            "Power {:.0} W -> {:.2} A (rounded {:.0} A, applied {:.0} A)",
            power_w, raw, rounded, clamped
        ));

        Ok(clamped)
    }
}

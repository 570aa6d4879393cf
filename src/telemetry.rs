//! Telemetry types exchanged between the client, the validator and the
//! downstream state machine and accountant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Untrusted JSON document as returned by the charger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTelemetry(serde_json::Value);

impl RawTelemetry {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Field lookup on the top-level object
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.as_object().and_then(|o| o.get(name))
    }

    /// Device name and address as advertised in `ID` / `IP`
    pub fn identity(&self) -> Option<(String, String)> {
        let id = self.field("ID")?.as_str()?.trim();
        let ip = self.field("IP")?.as_str()?.trim();
        if id.is_empty() || ip.is_empty() {
            return None;
        }
        Some((id.to_string(), ip.to_string()))
    }
}

impl From<serde_json::Value> for RawTelemetry {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Vehicle / session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChargeState {
    /// No vehicle plugged in
    #[default]
    Disconnected,
    /// Vehicle plugged in, not drawing energy
    Connected,
    /// Vehicle charging
    Charging,
}

impl ChargeState {
    /// Map the device's integer code. 4 and every unknown code mean disconnected.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ChargeState::Connected,
            2 => ChargeState::Charging,
            _ => ChargeState::Disconnected,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ChargeState::Disconnected => 0,
            ChargeState::Connected => 1,
            ChargeState::Charging => 2,
        }
    }

    pub fn is_plugged_in(self) -> bool {
        !matches!(self, ChargeState::Disconnected)
    }
}

impl fmt::Display for ChargeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChargeState::Disconnected => "disconnected",
            ChargeState::Connected => "connected",
            ChargeState::Charging => "charging",
        };
        f.write_str(s)
    }
}

/// Wi-Fi signal quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignalQuality {
    #[default]
    Low,
    Medium,
    Good,
}

impl SignalQuality {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(SignalQuality::Low),
            2 => Some(SignalQuality::Medium),
            3 => Some(SignalQuality::Good),
            _ => None,
        }
    }
}

/// Dynamic power control modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamicPowerMode {
    TimedEnabled,
    TimedDisabled,
    PvExclusive,
    PvMinPower,
    GridPv,
    WithoutCharge,
}

impl DynamicPowerMode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DynamicPowerMode::TimedEnabled),
            1 => Some(DynamicPowerMode::TimedDisabled),
            2 => Some(DynamicPowerMode::PvExclusive),
            3 => Some(DynamicPowerMode::PvMinPower),
            4 => Some(DynamicPowerMode::GridPv),
            5 => Some(DynamicPowerMode::WithoutCharge),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DynamicPowerMode::TimedEnabled => 0,
            DynamicPowerMode::TimedDisabled => 1,
            DynamicPowerMode::PvExclusive => 2,
            DynamicPowerMode::PvMinPower => 3,
            DynamicPowerMode::GridPv => 4,
            DynamicPowerMode::WithoutCharge => 5,
        }
    }
}

/// Two digit slave error code, `00` meaning no error
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlaveErrorCode(String);

impl SlaveErrorCode {
    pub const NO_ERROR: &'static str = "00";

    /// Left-pads to two characters; longer input is kept as-is so the
    /// schema check can reject it.
    pub fn new(code: &str) -> Self {
        Self(format!("{:0>2}", code.trim()))
    }

    pub fn none() -> Self {
        Self(Self::NO_ERROR.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 2 && self.0.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn is_error(&self) -> bool {
        self.0 != Self::NO_ERROR
    }

    pub fn description(&self) -> &'static str {
        match self.0.as_str() {
            "00" => "no error",
            "01" => "communication error",
            "02" => "reading error",
            "03" => "slave error",
            "04" => "waiting for Wi-Fi inverter",
            "05" => "waiting for communication",
            "06" => "wrong IP address",
            "07" => "slave not found",
            "08" => "wrong slave",
            "09" => "no response",
            "10" => "clamp not connected",
            _ => "unknown error",
        }
    }
}

impl Default for SlaveErrorCode {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for SlaveErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical, range-checked snapshot of one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub charge_state: ChargeState,
    pub charge_power_watts: f64,
    pub voltage_volts: f64,
    pub intensity_amps: f64,
    /// Device counter for the current physical session
    pub cumulative_energy_kwh: f64,
    pub session_seconds: u64,
    pub paused: bool,
    pub locked: bool,
    pub dynamic_mode_enabled: bool,
    pub timer_enabled: bool,
    pub slave_error: SlaveErrorCode,
    pub house_power_watts: Option<f64>,
    pub pv_power_watts: Option<f64>,
    pub battery_power_watts: Option<f64>,
    pub min_intensity_amps: f64,
    pub max_intensity_amps: f64,
    pub firmware_version: String,
    pub signal_quality: SignalQuality,
    pub dynamic_power_mode: Option<DynamicPowerMode>,
}

impl DeviceSnapshot {
    pub fn charge_time_minutes(&self) -> u64 {
        self.session_seconds / 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn charge_state_codes() {
        assert_eq!(ChargeState::from_code(0), ChargeState::Disconnected);
        assert_eq!(ChargeState::from_code(1), ChargeState::Connected);
        assert_eq!(ChargeState::from_code(2), ChargeState::Charging);
        assert_eq!(ChargeState::from_code(4), ChargeState::Disconnected);
        assert_eq!(ChargeState::from_code(-1), ChargeState::Disconnected);
        assert_eq!(ChargeState::Charging.code(), 2);
    }

    #[test]
    fn slave_error_padding_and_table() {
        let e = SlaveErrorCode::new("7");
        assert_eq!(e.as_str(), "07");
        assert!(e.is_well_formed());
        assert!(e.is_error());
        assert_eq!(e.description(), "slave not found");
        assert!(!SlaveErrorCode::none().is_error());
        assert!(!SlaveErrorCode::new("123").is_well_formed());
        assert!(!SlaveErrorCode::new("ab").is_well_formed());
    }

    #[test]
    fn identity_requires_both_fields() {
        let raw = RawTelemetry::new(json!({"ID": "V2C-1234", "IP": "10.0.0.9"}));
        assert_eq!(
            raw.identity(),
            Some(("V2C-1234".to_string(), "10.0.0.9".to_string()))
        );
        let raw = RawTelemetry::new(json!({"ID": "V2C-1234"}));
        assert!(raw.identity().is_none());
    }

    #[test]
    fn charge_time_in_minutes() {
        let snap = DeviceSnapshot {
            charge_state: ChargeState::Charging,
            charge_power_watts: 0.0,
            voltage_volts: 0.0,
            intensity_amps: 6.0,
            cumulative_energy_kwh: 0.0,
            session_seconds: 125,
            paused: false,
            locked: false,
            dynamic_mode_enabled: false,
            timer_enabled: false,
            slave_error: SlaveErrorCode::none(),
            house_power_watts: None,
            pv_power_watts: None,
            battery_power_watts: None,
            min_intensity_amps: 6.0,
            max_intensity_amps: 32.0,
            firmware_version: String::new(),
            signal_quality: SignalQuality::Low,
            dynamic_power_mode: None,
        };
        assert_eq!(snap.charge_time_minutes(), 2);
    }
}

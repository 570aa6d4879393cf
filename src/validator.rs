//! Telemetry validation
//!
//! Turns an untrusted [`RawTelemetry`] document into a [`DeviceSnapshot`]
//! whose every field is finite, in range and drawn from its declared set.
//! Validation runs in four steps:
//!
//! 1. structural check for the required fields,
//! 2. total per-field coercion (never fails, records a [`Correction`]),
//! 3. charge state mapping,
//! 4. a schema check of the finished snapshot.
//!
//! Any failure in step 1 or 4 rejects the whole document.

use crate::config::LimitsConfig;
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::{
    ChargeState, DeviceSnapshot, DynamicPowerMode, RawTelemetry, SignalQuality, SlaveErrorCode,
};
use serde_json::Value;

/// Fields the charger must always report
pub const REQUIRED_FIELDS: [&str; 5] = [
    "ChargeState",
    "ChargePower",
    "FirmwareVersion",
    "ChargeEnergy",
    "Intensity",
];

/// A value that had to be replaced or clamped during coercion
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub field: &'static str,
    pub reason: String,
}

/// Range-checks raw telemetry against the configured hardware limits
#[derive(Debug, Clone)]
pub struct TelemetryValidator {
    limits: LimitsConfig,
    logger: StructuredLogger,
}

impl TelemetryValidator {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            logger: get_logger("validator"),
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Validate a document, `None` when it has to be rejected
    pub fn validate(&self, raw: &RawTelemetry) -> Option<DeviceSnapshot> {
        self.validate_with_trace(raw).map(|(snapshot, _)| snapshot)
    }

    /// Validate a document and return the corrections applied on the way
    pub fn validate_with_trace(
        &self,
        raw: &RawTelemetry,
    ) -> Option<(DeviceSnapshot, Vec<Correction>)> {
        let Some(obj) = raw.as_value().as_object() else {
            self.logger
                .warn("Rejected telemetry: document is not a JSON object");
            return None;
        };

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|f| !obj.contains_key(*f))
            .collect();
        if !missing.is_empty() {
            self.logger.warn(&format!(
                "Rejected telemetry: missing required fields {}",
                missing.join(", ")
            ));
            return None;
        }

        let mut c = Coercer::new(raw, &self.limits);
        let snapshot = c.snapshot();
        let trace = c.trace;

        for correction in &trace {
            self.logger.debug(&format!(
                "Corrected {}: {}",
                correction.field, correction.reason
            ));
        }

        if let Err(problem) = check_schema(&snapshot, &self.limits) {
            self.logger
                .warn(&format!("Rejected telemetry: schema check failed, {}", problem));
            return None;
        }

        Some((snapshot, trace))
    }
}

/// Per-document coercion state
struct Coercer<'a> {
    raw: &'a RawTelemetry,
    limits: &'a LimitsConfig,
    trace: Vec<Correction>,
}

impl<'a> Coercer<'a> {
    fn new(raw: &'a RawTelemetry, limits: &'a LimitsConfig) -> Self {
        Self {
            raw,
            limits,
            trace: Vec::new(),
        }
    }

    fn raw(&self) -> &'a RawTelemetry {
        self.raw
    }

    fn note(&mut self, field: &'static str, reason: String) {
        self.trace.push(Correction { field, reason });
    }

    fn snapshot(&mut self) -> DeviceSnapshot {
        let l = self.limits;
        DeviceSnapshot {
            charge_state: self.charge_state(),
            charge_power_watts: self.number("ChargePower", 0.0, Some((l.power_min, l.power_max))),
            voltage_volts: self.number("VoltageInstallation", 0.0, Some((0.0, l.voltage_max))),
            intensity_amps: self.number(
                "Intensity",
                l.intensity_min,
                Some((l.intensity_min, l.intensity_max)),
            ),
            cumulative_energy_kwh: self.number("ChargeEnergy", 0.0, Some((0.0, f64::MAX))),
            session_seconds: self.number("ChargeTime", 0.0, Some((0.0, u64::MAX as f64))) as u64,
            paused: self.boolean("Paused"),
            locked: self.boolean("Locked"),
            dynamic_mode_enabled: self.boolean("Dynamic"),
            timer_enabled: self.boolean("Timer"),
            slave_error: self.slave_error(),
            house_power_watts: self.optional_power("HousePower"),
            pv_power_watts: self.optional_power("FVPower"),
            battery_power_watts: self.optional_power("BatteryPower"),
            min_intensity_amps: self.number(
                "MinIntensity",
                l.intensity_min,
                Some((l.intensity_min, l.intensity_max)),
            ),
            max_intensity_amps: self.number(
                "MaxIntensity",
                l.intensity_max,
                Some((l.intensity_min, l.intensity_max)),
            ),
            firmware_version: self.string("FirmwareVersion"),
            signal_quality: self.signal_quality(),
            dynamic_power_mode: self.dynamic_power_mode(),
        }
    }

    fn number(&mut self, field: &'static str, default: f64, bounds: Option<(f64, f64)>) -> f64 {
        let value = match self.raw().field(field) {
            None | Some(Value::Null) => {
                self.note(field, format!("absent, using {}", default));
                return default;
            }
            Some(v) => v,
        };

        let Some(n) = parse_number(value) else {
            self.note(field, format!("not numeric ({}), using {}", value, default));
            return default;
        };

        match bounds {
            Some((min, _)) if n < min => {
                self.note(field, format!("{} below {}, clamped", n, min));
                min
            }
            Some((_, max)) if n > max => {
                self.note(field, format!("{} above {}, clamped", n, max));
                max
            }
            _ => n,
        }
    }

    fn optional_power(&mut self, field: &'static str) -> Option<f64> {
        match self.raw().field(field) {
            None | Some(Value::Null) => None,
            Some(v) => match parse_number(v) {
                Some(n) => Some(self.clamp_power(field, n)),
                None => {
                    self.note(field, format!("not numeric ({}), dropped", v));
                    None
                }
            },
        }
    }

    fn clamp_power(&mut self, field: &'static str, n: f64) -> f64 {
        let (min, max) = (self.limits.power_min, self.limits.power_max);
        if n < min || n > max {
            let clamped = n.clamp(min, max);
            self.note(field, format!("{} outside {}..{}, clamped", n, min, max));
            clamped
        } else {
            n
        }
    }

    fn boolean(&mut self, field: &'static str) -> bool {
        let Some(value) = self.raw().field(field) else {
            return false;
        };
        match parse_bool(value) {
            Some(b) => b,
            None => {
                self.note(field, format!("not a boolean ({}), using false", value));
                false
            }
        }
    }

    fn string(&mut self, field: &'static str) -> String {
        match self.raw().field(field) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(other) => {
                self.note(field, format!("not a string ({}), using empty", other));
                String::new()
            }
            None => String::new(),
        }
    }

    fn charge_state(&mut self) -> ChargeState {
        match self.raw().field("ChargeState").and_then(parse_number) {
            Some(n) if n.fract() == 0.0 => {
                let state = ChargeState::from_code(n as i64);
                if state == ChargeState::Disconnected && n != 0.0 {
                    self.note("ChargeState", format!("code {} treated as disconnected", n));
                }
                state
            }
            _ => {
                self.note("ChargeState", "unreadable, using disconnected".to_string());
                ChargeState::Disconnected
            }
        }
    }

    fn slave_error(&mut self) -> SlaveErrorCode {
        match self.raw().field("SlaveError") {
            Some(Value::String(s)) if !s.trim().is_empty() => SlaveErrorCode::new(s),
            Some(Value::Number(n)) => match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 => {
                    SlaveErrorCode::new(&(f as u64).to_string())
                }
                _ => {
                    self.note("SlaveError", format!("invalid code {}, using 00", n));
                    SlaveErrorCode::none()
                }
            },
            None | Some(Value::Null) => SlaveErrorCode::none(),
            Some(other) => {
                self.note("SlaveError", format!("invalid code {}, using 00", other));
                SlaveErrorCode::none()
            }
        }
    }

    fn signal_quality(&mut self) -> SignalQuality {
        let Some(value) = self.raw().field("SignalStatus") else {
            return SignalQuality::Low;
        };
        let quality = parse_number(value)
            .filter(|n| n.fract() == 0.0)
            .and_then(|n| SignalQuality::from_code(n as i64));
        quality.unwrap_or_else(|| {
            self.note("SignalStatus", format!("unknown value {}, using low", value));
            SignalQuality::Low
        })
    }

    fn dynamic_power_mode(&mut self) -> Option<DynamicPowerMode> {
        let value = match self.raw().field("DynamicPowerMode") {
            None | Some(Value::Null) => return None,
            Some(v) => v,
        };
        let mode = parse_number(value)
            .filter(|n| n.fract() == 0.0)
            .and_then(|n| DynamicPowerMode::from_code(n as i64));
        if mode.is_none() {
            self.note("DynamicPowerMode", format!("unknown mode {}, dropped", value));
        }
        mode
    }
}

/// Numbers and numeric strings; anything non-finite is rejected
fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Null => Some(false),
        _ => None,
    }
}

fn check_schema(s: &DeviceSnapshot, l: &LimitsConfig) -> std::result::Result<(), String> {
    let in_range = |name: &str, v: f64, min: f64, max: f64| {
        if v.is_finite() && v >= min && v <= max {
            Ok(())
        } else {
            Err(format!("{}={} not within {}..{}", name, v, min, max))
        }
    };

    in_range("charge_power_watts", s.charge_power_watts, l.power_min, l.power_max)?;
    in_range("voltage_volts", s.voltage_volts, 0.0, l.voltage_max)?;
    in_range("intensity_amps", s.intensity_amps, l.intensity_min, l.intensity_max)?;
    in_range("min_intensity_amps", s.min_intensity_amps, l.intensity_min, l.intensity_max)?;
    in_range("max_intensity_amps", s.max_intensity_amps, l.intensity_min, l.intensity_max)?;
    in_range("cumulative_energy_kwh", s.cumulative_energy_kwh, 0.0, f64::MAX)?;
    for (name, v) in [
        ("house_power_watts", s.house_power_watts),
        ("pv_power_watts", s.pv_power_watts),
        ("battery_power_watts", s.battery_power_watts),
    ] {
        if let Some(v) = v {
            in_range(name, v, l.power_min, l.power_max)?;
        }
    }
    if !s.slave_error.is_well_formed() {
        return Err(format!("slave_error={} is not a two digit code", s.slave_error));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> TelemetryValidator {
        TelemetryValidator::new(LimitsConfig::default())
    }

    fn base() -> Value {
        json!({
            "ChargeState": 2,
            "ChargePower": 7200.5,
            "ChargeEnergy": 3.25,
            "Intensity": 16,
            "FirmwareVersion": "2.1.7",
            "VoltageInstallation": 230,
            "ChargeTime": 3600,
            "SlaveError": 0,
            "Paused": 0,
            "Locked": 0,
            "Dynamic": 1
        })
    }

    #[test]
    fn accepts_well_formed_document() {
        let (snap, trace) = validator()
            .validate_with_trace(&RawTelemetry::new(base()))
            .unwrap();
        assert_eq!(snap.charge_state, ChargeState::Charging);
        assert_eq!(snap.charge_power_watts, 7200.5);
        assert_eq!(snap.intensity_amps, 16.0);
        assert_eq!(snap.session_seconds, 3600);
        assert!(snap.dynamic_mode_enabled);
        assert_eq!(snap.slave_error.as_str(), "00");
        assert_eq!(snap.firmware_version, "2.1.7");
        assert!(snap.house_power_watts.is_none());
        assert!(trace.iter().all(|c| c.field != "ChargePower"));
    }

    #[test]
    fn rejects_non_object() {
        assert!(validator().validate(&RawTelemetry::new(json!([1, 2]))).is_none());
        assert!(validator().validate(&RawTelemetry::new(json!("x"))).is_none());
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let mut doc = base();
        doc["ChargeState"] = json!("1");
        doc["ChargeEnergy"] = json!(" 4.5 ");
        let snap = validator().validate(&RawTelemetry::new(doc)).unwrap();
        assert_eq!(snap.charge_state, ChargeState::Connected);
        assert_eq!(snap.cumulative_energy_kwh, 4.5);
    }

    #[test]
    fn garbage_numbers_fall_back_to_defaults() {
        let mut doc = base();
        doc["ChargePower"] = json!("lots");
        doc["VoltageInstallation"] = json!({"v": 1});
        doc["ChargeEnergy"] = json!(-2.0);
        let (snap, trace) = validator()
            .validate_with_trace(&RawTelemetry::new(doc))
            .unwrap();
        assert_eq!(snap.charge_power_watts, 0.0);
        assert_eq!(snap.voltage_volts, 0.0);
        assert_eq!(snap.cumulative_energy_kwh, 0.0);
        let fields: Vec<_> = trace.iter().map(|c| c.field).collect();
        assert!(fields.contains(&"ChargePower"));
        assert!(fields.contains(&"VoltageInstallation"));
        assert!(fields.contains(&"ChargeEnergy"));
    }

    #[test]
    fn optional_powers_are_clamped_or_dropped() {
        let mut doc = base();
        doc["HousePower"] = json!(50000);
        doc["FVPower"] = json!("n/a");
        doc["BatteryPower"] = json!(-1200);
        let snap = validator().validate(&RawTelemetry::new(doc)).unwrap();
        assert_eq!(snap.house_power_watts, Some(22000.0));
        assert_eq!(snap.pv_power_watts, None);
        assert_eq!(snap.battery_power_watts, Some(-1200.0));
    }

    #[test]
    fn enums_fall_back_to_safe_variants() {
        let mut doc = base();
        doc["SignalStatus"] = json!(9);
        doc["DynamicPowerMode"] = json!(3);
        let snap = validator().validate(&RawTelemetry::new(doc)).unwrap();
        assert_eq!(snap.signal_quality, SignalQuality::Low);
        assert_eq!(snap.dynamic_power_mode, Some(DynamicPowerMode::PvMinPower));

        let mut doc = base();
        doc["SignalStatus"] = json!("3");
        doc["DynamicPowerMode"] = json!(42);
        let snap = validator().validate(&RawTelemetry::new(doc)).unwrap();
        assert_eq!(snap.signal_quality, SignalQuality::Good);
        assert_eq!(snap.dynamic_power_mode, None);
    }

    #[test]
    fn firmware_must_be_string() {
        let mut doc = base();
        doc["FirmwareVersion"] = json!(217);
        let snap = validator().validate(&RawTelemetry::new(doc)).unwrap();
        assert_eq!(snap.firmware_version, "");
    }

    #[test]
    fn oversized_slave_error_fails_schema() {
        let mut doc = base();
        doc["SlaveError"] = json!(123);
        assert!(validator().validate(&RawTelemetry::new(doc)).is_none());

        let mut doc = base();
        doc["SlaveError"] = json!("5");
        let snap = validator().validate(&RawTelemetry::new(doc)).unwrap();
        assert_eq!(snap.slave_error.as_str(), "05");
    }
}

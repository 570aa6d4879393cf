#![no_main]

use hestia::config::LimitsConfig;
use hestia::telemetry::RawTelemetry;
use hestia::validator::TelemetryValidator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let limits = LimitsConfig::default();
    let validator = TelemetryValidator::new(limits.clone());
    if let Some(snap) = validator.validate(&RawTelemetry::new(value)) {
        assert!(snap.charge_power_watts.is_finite());
        assert!((limits.intensity_min..=limits.intensity_max).contains(&snap.intensity_amps));
        assert!(snap.cumulative_energy_kwh >= 0.0);
        assert!(snap.slave_error.is_well_formed());
    }
});

use super::*;

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "v2c-wallbox".to_string(),
            host: "192.168.1.120".to_string(),
            port: 80,
            request_timeout_ms: 5000,
            max_consecutive_errors: 20,
            cache_freshness_ms: 1000,
            unavailable_after_secs: 300,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            min_interval_secs: 5,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            intensity_min: 6.0,
            intensity_max: 32.0,
            voltage_min: 110.0,
            voltage_max: 400.0,
            power_min: -22000.0,
            power_max: 22000.0,
        }
    }
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            max_energy_delta_kwh: 100.0,
            reset_tolerance_kwh: 0.1,
        }
    }
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            phase_mode: PhaseMode::Single,
            voltage_type: VoltageType::LineToNeutral,
            nominal_voltage: 230.0,
            rounding: RoundingMode::Math,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/hestia.log".to_string(),
            backup_count: 7,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "/data/hestia_state.json".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            polling: PollingConfig::default(),
            limits: LimitsConfig::default(),
            energy: EnergyConfig::default(),
            charging: ChargingConfig::default(),
            logging: LoggingConfig::default(),
            store: StoreConfig::default(),
            timezone: "Europe/Prague".to_string(),
        }
    }
}

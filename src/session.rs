//! Charge session state machine
//!
//! Tracks the vehicle's [`ChargeState`] and the charger's slave error code
//! across ticks and restarts, and turns changes into [`MonitorEvent`]s. Energy
//! is not this module's concern; the accountant receives the
//! previous/current pair from [`SessionUpdate`].

use crate::error::Result;
use crate::events::MonitorEvent;
use crate::logging::{StructuredLogger, get_logger};
use crate::persistence::KeyValueStore;
use crate::telemetry::{ChargeState, DeviceSnapshot, SlaveErrorCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persisted tracker state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRecord {
    /// Charge state seen on the last tick
    pub charge_state: ChargeState,

    /// Slave error seen on the last tick
    pub slave_error: SlaveErrorCode,

    /// Physical session the car is in, if plugged in
    pub session_id: Option<String>,

    /// When the current physical session began
    pub started_at: Option<DateTime<Utc>>,
}

/// Result of one observation
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub previous: ChargeState,
    pub current: ChargeState,
    pub events: Vec<MonitorEvent>,

    /// Record to persist for this observation
    pub record: SessionRecord,
}

pub struct SessionTracker {
    store: Arc<dyn KeyValueStore>,
    key: String,
    record: SessionRecord,
    logger: StructuredLogger,
}

impl SessionTracker {
    /// Restore the tracker for `device_id` from the store
    pub fn load(store: Arc<dyn KeyValueStore>, device_id: &str) -> Result<Self> {
        let key = format!("{}.session", device_id);
        let logger = get_logger("session");

        let record = match store.get(&key)? {
            Some(value) => match serde_json::from_value::<SessionRecord>(value) {
                Ok(record) => {
                    logger.info(&format!(
                        "Restored session state: {} (slave error {})",
                        record.charge_state, record.slave_error
                    ));
                    record
                }
                Err(e) => {
                    logger.warn(&format!("Discarding unreadable session state: {}", e));
                    SessionRecord::default()
                }
            },
            None => SessionRecord::default(),
        };

        Ok(Self {
            store,
            key,
            record,
            logger,
        })
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn state(&self) -> ChargeState {
        self.record.charge_state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.record.session_id.as_deref()
    }

    /// Store key holding this tracker's record
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Compare a validated snapshot with the persisted state
    ///
    /// The new state is persisted on every call. When the write fails the
    /// tracker keeps its previous state and no events are produced.
    pub fn observe(&mut self, snapshot: &DeviceSnapshot) -> Result<SessionUpdate> {
        let update = self.prepare(snapshot);
        self.store
            .set(&self.key, serde_json::to_value(&update.record)?)?;
        self.apply(&update);
        Ok(update)
    }

    /// Work out the next record and its events without touching the store
    ///
    /// Callers that persist the record themselves hand the update back to
    /// [`SessionTracker::apply`] once the write succeeded.
    pub fn prepare(&self, snapshot: &DeviceSnapshot) -> SessionUpdate {
        let previous = self.record.charge_state;
        let current = snapshot.charge_state;
        let mut next = self.record.clone();
        let mut events = Vec::new();

        if previous != current {
            events.push(match current {
                ChargeState::Connected => MonitorEvent::CarConnected,
                ChargeState::Charging => MonitorEvent::CarStartedCharging,
                ChargeState::Disconnected => MonitorEvent::CarDisconnected,
            });

            if previous == ChargeState::Disconnected {
                next.session_id = Some(uuid::Uuid::new_v4().to_string());
                next.started_at = Some(Utc::now());
            } else if current == ChargeState::Disconnected {
                next.session_id = None;
                next.started_at = None;
            }
        }
        next.charge_state = current;

        if snapshot.slave_error != self.record.slave_error {
            events.push(MonitorEvent::SlaveErrorChanged(snapshot.slave_error.clone()));
            next.slave_error = snapshot.slave_error.clone();
        }

        SessionUpdate {
            previous,
            current,
            events,
            record: next,
        }
    }

    /// Adopt a prepared record after it has been persisted
    pub fn apply(&mut self, update: &SessionUpdate) {
        let next = &update.record;
        let logger = self.logger.for_session(
            next.session_id
                .as_deref()
                .or(self.record.session_id.as_deref()),
        );
        if update.previous != update.current {
            logger.info(&format!(
                "Charge state {} -> {}",
                update.previous, update.current
            ));
        }
        if next.slave_error != self.record.slave_error {
            logger.warn(&format!(
                "Slave error {} -> {} ({})",
                self.record.slave_error,
                next.slave_error,
                next.slave_error.description()
            ));
        }
        self.record = next.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::telemetry::SignalQuality;

    fn snapshot(state: ChargeState, slave_error: &str) -> DeviceSnapshot {
        DeviceSnapshot {
            charge_state: state,
            charge_power_watts: 0.0,
            voltage_volts: 230.0,
            intensity_amps: 16.0,
            cumulative_energy_kwh: 0.0,
            session_seconds: 0,
            paused: false,
            locked: false,
            dynamic_mode_enabled: false,
            timer_enabled: false,
            slave_error: SlaveErrorCode::new(slave_error),
            house_power_watts: None,
            pv_power_watts: None,
            battery_power_watts: None,
            min_intensity_amps: 6.0,
            max_intensity_amps: 32.0,
            firmware_version: "2.1.7".to_string(),
            signal_quality: SignalQuality::Good,
            dynamic_power_mode: None,
        }
    }

    #[test]
    fn session_id_follows_plug_in() {
        let store = Arc::new(MemoryStore::new());
        let mut t = SessionTracker::load(store, "wb").unwrap();
        assert!(t.session_id().is_none());

        t.observe(&snapshot(ChargeState::Connected, "00")).unwrap();
        let id = t.session_id().map(str::to_string);
        assert!(id.is_some());

        t.observe(&snapshot(ChargeState::Charging, "00")).unwrap();
        assert_eq!(t.session_id().map(str::to_string), id);

        t.observe(&snapshot(ChargeState::Disconnected, "00")).unwrap();
        assert!(t.session_id().is_none());
    }

    #[test]
    fn prepare_waits_for_apply() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut t = SessionTracker::load(store.clone(), "wb").unwrap();

        let update = t.prepare(&snapshot(ChargeState::Charging, "00"));
        assert_eq!(update.events, vec![MonitorEvent::CarStartedCharging]);
        assert_eq!(t.state(), ChargeState::Disconnected);
        assert!(store.get(t.key()).unwrap().is_none());

        t.apply(&update);
        assert_eq!(t.state(), ChargeState::Charging);
        assert_eq!(t.session_id(), update.record.session_id.as_deref());
    }

    #[test]
    fn state_survives_reload() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut t = SessionTracker::load(store.clone(), "wb").unwrap();
        t.observe(&snapshot(ChargeState::Charging, "03")).unwrap();

        let mut t2 = SessionTracker::load(store, "wb").unwrap();
        assert_eq!(t2.state(), ChargeState::Charging);
        let update = t2.observe(&snapshot(ChargeState::Charging, "03")).unwrap();
        assert!(update.events.is_empty());
    }
}

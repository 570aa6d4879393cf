//! Poll orchestration
//!
//! A [`Poller`] owns everything that belongs to one monitored wallbox and runs
//! a tick as client -> validator -> session tracker -> energy accountant.
//! [`Monitor::spawn`] drives it from a timer on a background task and hands
//! back a [`MonitorHandle`] for commands and teardown.

use crate::client::{ConnectivityState, FetchError, SnapshotClient, TelemetrySource};
use crate::config::Config;
use crate::energy::{EnergyAccountant, EnergyOutcome};
use crate::error::{HestiaError, Result};
use crate::events::{EnergyTotals, EventSink, MonitorEvent};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::persistence::KeyValueStore;
use crate::power::CurrentCalculator;
use crate::session::SessionTracker;
use crate::telemetry::{ChargeState, DeviceSnapshot, DynamicPowerMode};
use crate::validator::TelemetryValidator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Shortest period the poll timer accepts
const MIN_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Operations the host can request
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    SetPaused(bool),
    SetLocked(bool),
    SetIntensity(f64),
    SetMinIntensity(f64),
    SetMaxIntensity(f64),
    SetDynamic(bool),
    SetDynamicPowerMode(DynamicPowerMode),
    /// Target power in watts, converted to a current
    SetChargePower(f64),
    ResetMonthlyEnergy,
    ResetYearlyEnergy,
    SetMonthlyEnergy(f64),
    SetYearlyEnergy(f64),
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Snapshot accepted and passed through the whole pipeline
    Processed {
        previous: ChargeState,
        current: ChargeState,
        energy: EnergyOutcome,
    },
    /// Telemetry failed validation, nothing was recorded
    Rejected,
    /// The fetch failed
    FetchFailed { exhausted: bool },
    /// Another tick or command held the poller
    Skipped,
}

/// Per-device runtime state
#[derive(Debug, Clone, Default)]
pub struct PollerState {
    /// Connectivity as of the last tick
    pub connectivity: Option<ConnectivityState>,
    /// Start of the current run of failed fetches
    pub failing_since: Option<DateTime<Utc>>,
    /// `DeviceUnavailable` has been reported for the current outage
    pub unavailable: bool,
    pub last_snapshot: Option<DeviceSnapshot>,
    pub last_success: Option<DateTime<Utc>>,
    /// Name and address advertised by the charger
    pub identity: Option<(String, String)>,
    pub ticks: u64,
}

pub struct Poller {
    client: SnapshotClient,
    validator: TelemetryValidator,
    session: SessionTracker,
    energy: EnergyAccountant,
    store: Arc<dyn KeyValueStore>,
    calculator: CurrentCalculator,
    events: Arc<dyn EventSink>,
    unavailable_after: chrono::Duration,
    state: PollerState,
    logger: StructuredLogger,
}

impl Poller {
    pub fn new(
        config: &Config,
        source: Arc<dyn TelemetrySource>,
        store: Arc<dyn KeyValueStore>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let device_id = config.device.id.as_str();
        let tz = config.tz()?;
        let unavailable_after = chrono::Duration::from_std(config.device.unavailable_after())
            .map_err(|e| HestiaError::config(format!("unavailable_after_secs: {}", e)))?;

        Ok(Self {
            client: SnapshotClient::new(source, &config.device),
            validator: TelemetryValidator::new(config.limits.clone()),
            session: SessionTracker::load(store.clone(), device_id)?,
            energy: EnergyAccountant::load(
                store.clone(),
                device_id,
                &config.energy,
                tz,
                Utc::now(),
            )?,
            store,
            calculator: CurrentCalculator::from_config(config),
            events,
            unavailable_after,
            state: PollerState::default(),
            logger: get_logger_with_context(LogContext::new("poller").with_device_id(device_id)),
        })
    }

    pub fn state(&self) -> &PollerState {
        &self.state
    }

    pub fn client(&self) -> &SnapshotClient {
        &self.client
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    pub fn energy(&self) -> &EnergyAccountant {
        &self.energy
    }

    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick with `now` as the wall-clock time
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickOutcome> {
        self.state.ticks = self.state.ticks.saturating_add(1);

        let raw = match self.client.fetch().await {
            Ok(raw) => raw,
            Err(e) => return Ok(self.on_fetch_failure(e, now)),
        };
        self.on_fetch_success(now);

        if let Some(identity) = raw.identity()
            && self.state.identity.as_ref() != Some(&identity)
        {
            self.logger
                .info(&format!("Device reports as {} at {}", identity.0, identity.1));
            self.state.identity = Some(identity);
        }

        let Some(snapshot) = self.validator.validate(&raw) else {
            return Ok(TickOutcome::Rejected);
        };

        // Session record and ledger go out in one write; on failure neither moves
        let update = self.session.prepare(&snapshot);
        let step = self
            .energy
            .evaluate(&snapshot, update.previous, update.current, now);
        let mut entries = vec![(
            self.session.key().to_string(),
            serde_json::to_value(&update.record)?,
        )];
        if let Some(ledger) = &step.ledger {
            entries.push((self.energy.key().to_string(), serde_json::to_value(ledger)?));
        }
        self.store.set_all(entries)?;

        self.session.apply(&update);
        let energy = self.energy.apply(step);
        for event in &update.events {
            self.events.emit(event.clone());
        }
        if let EnergyOutcome::Updated(totals) = &energy {
            self.events.emit(MonitorEvent::EnergyUpdated(totals.clone()));
        }

        self.logger.for_session(update.record.session_id.as_deref()).trace(&format!(
            "Tick: {} at {:.0} W, counter {:.3} kWh",
            snapshot.charge_state, snapshot.charge_power_watts, snapshot.cumulative_energy_kwh
        ));
        self.state.last_snapshot = Some(snapshot);

        Ok(TickOutcome::Processed {
            previous: update.previous,
            current: update.current,
            energy,
        })
    }

    fn on_fetch_success(&mut self, now: DateTime<Utc>) {
        if let Some(prev) = self.state.connectivity
            && prev != ConnectivityState::Ok
        {
            self.logger.info("Connection to device restored");
            self.events.emit(MonitorEvent::ConnectionRestored);
        }
        if self.state.unavailable {
            self.events.emit(MonitorEvent::DeviceAvailable);
        }
        self.state.connectivity = Some(ConnectivityState::Ok);
        self.state.failing_since = None;
        self.state.unavailable = false;
        self.state.last_success = Some(now);
    }

    fn on_fetch_failure(&mut self, err: FetchError, now: DateTime<Utc>) -> TickOutcome {
        let connectivity = self.client.connectivity();
        let exhausted = err.is_exhausted();

        if exhausted {
            if self.state.connectivity != Some(ConnectivityState::Failed) {
                self.logger.error(&format!("Connection lost: {}", err));
                self.events.emit(MonitorEvent::ConnectionLost);
            }
        } else {
            self.logger.debug(&format!("Fetch failed: {}", err));
        }

        let since = *self.state.failing_since.get_or_insert(now);
        if !self.state.unavailable && now - since >= self.unavailable_after {
            self.logger.warn(&format!(
                "Device unavailable, no data since {}",
                since.to_rfc3339()
            ));
            self.state.unavailable = true;
            self.events.emit(MonitorEvent::DeviceUnavailable);
        }

        self.state.connectivity = Some(connectivity);
        TickOutcome::FetchFailed { exhausted }
    }

    pub async fn execute(&mut self, command: DeviceCommand) -> Result<()> {
        self.execute_at(command, Utc::now()).await
    }

    pub async fn execute_at(&mut self, command: DeviceCommand, now: DateTime<Utc>) -> Result<()> {
        self.logger.debug(&format!("Executing {:?}", command));
        match command {
            DeviceCommand::SetPaused(v) => self.write_flag("Paused", v).await,
            DeviceCommand::SetLocked(v) => self.write_flag("Locked", v).await,
            DeviceCommand::SetDynamic(v) => self.write_flag("Dynamic", v).await,
            DeviceCommand::SetIntensity(a) => self.write_current("Intensity", a).await,
            DeviceCommand::SetMinIntensity(a) => self.write_current("MinIntensity", a).await,
            DeviceCommand::SetMaxIntensity(a) => self.write_current("MaxIntensity", a).await,
            DeviceCommand::SetDynamicPowerMode(mode) => {
                self.client
                    .write_parameter("DynamicPowerMode", &mode.code().to_string())
                    .await
            }
            DeviceCommand::SetChargePower(watts) => {
                let mut calc = self.calculator.clone();
                if let Some(s) = &self.state.last_snapshot {
                    calc = calc.with_max_amps(s.max_intensity_amps);
                }
                let amps = calc.current_for_power(watts)?;
                self.write_current("Intensity", amps).await
            }
            DeviceCommand::ResetMonthlyEnergy => {
                let totals = self.energy.reset_monthly(now)?;
                self.publish(totals);
                Ok(())
            }
            DeviceCommand::ResetYearlyEnergy => {
                let totals = self.energy.reset_yearly(now)?;
                self.publish(totals);
                Ok(())
            }
            DeviceCommand::SetMonthlyEnergy(kwh) => {
                let totals = self.energy.set_monthly(kwh, now)?;
                self.publish(totals);
                Ok(())
            }
            DeviceCommand::SetYearlyEnergy(kwh) => {
                let totals = self.energy.set_yearly(kwh, now)?;
                self.publish(totals);
                Ok(())
            }
        }
    }

    fn publish(&self, totals: EnergyTotals) {
        self.events.emit(MonitorEvent::EnergyUpdated(totals));
    }

    async fn write_flag(&mut self, param: &str, value: bool) -> Result<()> {
        self.client
            .write_parameter(param, if value { "1" } else { "0" })
            .await
    }

    async fn write_current(&mut self, param: &str, amps: f64) -> Result<()> {
        let limits = self.validator.limits();
        if !(amps.is_finite() && amps >= limits.intensity_min && amps <= limits.intensity_max) {
            return Err(HestiaError::validation(
                param.to_string(),
                format!(
                    "{} A outside {}..{} A",
                    amps, limits.intensity_min, limits.intensity_max
                ),
            ));
        }
        let amps = amps.round() as u32;
        self.client.write_parameter(param, &amps.to_string()).await
    }
}

/// Background poll loop launcher
pub struct Monitor;

impl Monitor {
    /// Start polling on the current tokio runtime
    ///
    /// `period` is raised to `min_period` when shorter, and never runs
    /// below one second.
    pub fn spawn(poller: Poller, period: Duration, min_period: Duration) -> MonitorHandle {
        let period = period.max(min_period).max(MIN_POLL_PERIOD);
        let logger = poller.logger.clone();
        let poller = Arc::new(Mutex::new(poller));
        let skipped = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = {
            let poller = poller.clone();
            let skipped = skipped.clone();
            tokio::spawn(async move {
                logger.info(&format!("Polling every {} s", period.as_secs()));
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let Ok(mut guard) = poller.try_lock() else {
                                skipped.fetch_add(1, Ordering::Relaxed);
                                logger.debug("Previous tick still running, skipping");
                                continue;
                            };
                            tokio::select! {
                                res = guard.tick() => {
                                    if let Err(e) = res {
                                        logger.error(&format!("Tick failed: {}", e));
                                    }
                                }
                                _ = shutdown_rx.changed() => {
                                    logger.info("Shutdown during tick, in-flight tick dropped");
                                    break;
                                }
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            logger.info("Shutdown signal received");
                            break;
                        }
                    }
                }
                logger.info("Poll loop stopped");
            })
        };

        MonitorHandle {
            poller,
            skipped,
            shutdown_tx,
            task,
        }
    }

    /// Spawn with the interval settings from `config`
    pub fn spawn_with_config(poller: Poller, config: &Config) -> MonitorHandle {
        Self::spawn(poller, config.polling.effective_interval(), MIN_POLL_PERIOD)
    }
}

/// Handle to a running monitor
pub struct MonitorHandle {
    poller: Arc<Mutex<Poller>>,
    skipped: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    fn ensure_running(&self) -> Result<()> {
        if *self.shutdown_tx.borrow() {
            return Err(HestiaError::stopped("monitor has been shut down"));
        }
        Ok(())
    }

    /// Run a command against the device or the energy ledger
    pub async fn execute(&self, command: DeviceCommand) -> Result<()> {
        self.ensure_running()?;
        self.poller.lock().await.execute(command).await
    }

    /// Tick immediately unless a tick is already in progress
    pub async fn tick_now(&self) -> Result<TickOutcome> {
        self.ensure_running()?;
        match self.poller.try_lock() {
            Ok(mut poller) => poller.tick().await,
            Err(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                Ok(TickOutcome::Skipped)
            }
        }
    }

    pub async fn state(&self) -> PollerState {
        self.poller.lock().await.state().clone()
    }

    pub async fn totals(&self) -> EnergyTotals {
        self.poller.lock().await.energy().totals()
    }

    /// Ticks dropped by the single-flight guard
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Stop the timer, cancel any in-flight tick and wait for the loop
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| HestiaError::generic(format!("poll task failed: {}", e)))
    }
}

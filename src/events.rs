//! Events reported to the host
//!
//! The monitor never calls back into the host directly; everything it has to
//! say goes through an [`EventSink`].

use crate::logging::{LogContext, StructuredLogger, get_logger, get_logger_with_context};
use crate::telemetry::SlaveErrorCode;
use serde::Serialize;
use tokio::sync::mpsc;

/// Energy figures published after a committed tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyTotals {
    pub session_kwh: f64,
    pub monthly_kwh: f64,
    pub yearly_kwh: f64,
    pub last_month_kwh: f64,
    pub last_year_kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    CarConnected,
    CarDisconnected,
    CarStartedCharging,
    SlaveErrorChanged(SlaveErrorCode),
    ConnectionLost,
    ConnectionRestored,
    DeviceUnavailable,
    DeviceAvailable,
    EnergyUpdated(EnergyTotals),
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::CarConnected => "car_connected",
            MonitorEvent::CarDisconnected => "car_disconnected",
            MonitorEvent::CarStartedCharging => "car_started_charging",
            MonitorEvent::SlaveErrorChanged(_) => "slave_error_changed",
            MonitorEvent::ConnectionLost => "connection_lost",
            MonitorEvent::ConnectionRestored => "connection_restored",
            MonitorEvent::DeviceUnavailable => "device_unavailable",
            MonitorEvent::DeviceAvailable => "device_available",
            MonitorEvent::EnergyUpdated(_) => "energy_updated",
        }
    }
}

/// Fire-and-forget event delivery
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MonitorEvent);
}

/// Forwards events into a tokio channel
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: MonitorEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

/// Writes every event to the log
pub struct LogEventSink {
    logger: StructuredLogger,
}

impl LogEventSink {
    pub fn new(device_id: &str) -> Self {
        let logger = get_logger_with_context(LogContext::new("events").with_device_id(device_id));
        Self { logger }
    }
}

impl Default for LogEventSink {
    fn default() -> Self {
        Self {
            logger: get_logger("events"),
        }
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: MonitorEvent) {
        match &event {
            MonitorEvent::SlaveErrorChanged(code) => self.logger.warn(&format!(
                "Slave error changed to {} ({})",
                code,
                code.description()
            )),
            MonitorEvent::ConnectionLost | MonitorEvent::DeviceUnavailable => {
                self.logger.warn(&format!("Event: {}", event.name()))
            }
            MonitorEvent::EnergyUpdated(t) => self.logger.debug(&format!(
                "Energy: session {:.3} kWh, month {:.3} kWh, year {:.3} kWh",
                t.session_kwh, t.monthly_kwh, t.yearly_kwh
            )),
            _ => self.logger.info(&format!("Event: {}", event.name())),
        }
    }
}

//! # Hestia - telemetry poller for V2C wallbox EV chargers
//!
//! Polls a networked wallbox over its HTTP+JSON interface, validates each
//! snapshot, tracks the vehicle's charge-session lifecycle and keeps durable
//! session, monthly and yearly energy totals across counter resets, network
//! outages and period rollovers.
//!
//! ## Architecture
//!
//! - `client`: bounded fetches, consecutive-failure counting, device writes
//! - `telemetry`: raw and validated snapshot types
//! - `validator`: raw telemetry to range-checked snapshots
//! - `session`: charge-state machine and slave error tracking
//! - `energy`: session/monthly/yearly energy ledger
//! - `poller`: tick orchestration, background loop and commands
//! - `events`: typed events reported to the host
//! - `persistence`: key-value stores for state that survives restarts
//! - `power`: power target to charging current conversion
//! - `config`: configuration management and validation
//! - `logging`: structured logging and tracing

pub mod client;
pub mod config;
pub mod energy;
pub mod error;
pub mod events;
pub mod logging;
pub mod persistence;
pub mod poller;
pub mod power;
pub mod session;
pub mod telemetry;
pub mod validator;

// Re-export commonly used types
pub use config::Config;
pub use error::{HestiaError, Result};
pub use events::{EventSink, MonitorEvent};
pub use poller::{DeviceCommand, Monitor, MonitorHandle, Poller, TickOutcome};
pub use telemetry::{ChargeState, DeviceSnapshot, RawTelemetry};

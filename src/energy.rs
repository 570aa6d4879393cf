//! Energy accounting
//!
//! The charger only reports a per-session energy counter that may reset at
//! any time. The [`EnergyAccountant`] turns that counter into durable
//! session, monthly and yearly totals.
//!
//! Every tick works on a copy of the [`EnergyLedger`] and commits it with a
//! single store write, so a tick either lands completely or not at all.

use crate::config::EnergyConfig;
use crate::error::{HestiaError, Result};
use crate::events::EnergyTotals;
use crate::logging::{StructuredLogger, get_logger};
use crate::persistence::KeyValueStore;
use crate::telemetry::{ChargeState, DeviceSnapshot};
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPeriod {
    pub month: u32,
    pub year: i32,
    pub energy_kwh: f64,
    pub last_reset: Option<DateTime<Utc>>,
    pub last_set: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyPeriod {
    pub year: i32,
    pub energy_kwh: f64,
    pub last_reset: Option<DateTime<Utc>>,
    pub last_set: Option<DateTime<Utc>>,
}

/// Persisted accounting state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyLedger {
    /// Energy folded in from earlier charging phases of this plug-in
    pub base_session_energy_kwh: f64,
    /// Device counter when the current charging phase began
    pub session_start_energy_kwh: f64,
    /// Last published session energy, the reference for reset and jump detection
    pub session_energy_kwh: f64,
    pub monthly: MonthlyPeriod,
    pub yearly: YearlyPeriod,
    pub last_month_energy_kwh: f64,
    pub last_year_energy_kwh: f64,
}

impl EnergyLedger {
    /// Empty ledger positioned in the given period
    pub fn new(month: u32, year: i32) -> Self {
        Self {
            base_session_energy_kwh: 0.0,
            session_start_energy_kwh: 0.0,
            session_energy_kwh: 0.0,
            monthly: MonthlyPeriod {
                month,
                year,
                energy_kwh: 0.0,
                last_reset: None,
                last_set: None,
            },
            yearly: YearlyPeriod {
                year,
                energy_kwh: 0.0,
                last_reset: None,
                last_set: None,
            },
            last_month_energy_kwh: 0.0,
            last_year_energy_kwh: 0.0,
        }
    }

    /// Rebuild a ledger from stored JSON
    ///
    /// Totals that are missing, non-numeric or negative come back as zero and
    /// are listed in the second return value. Unreadable period markers fall
    /// back to the given period.
    pub fn from_stored(value: &Value, month: u32, year: i32) -> (Self, Vec<&'static str>) {
        let mut invalid = Vec::new();
        let mut total = |v: Option<&Value>, name: &'static str| -> f64 {
            match v.and_then(Value::as_f64) {
                Some(n) if n.is_finite() && n >= 0.0 => n,
                _ => {
                    invalid.push(name);
                    0.0
                }
            }
        };

        let monthly = value.get("monthly");
        let yearly = value.get("yearly");
        let timestamp = |v: Option<&Value>, key: &str| -> Option<DateTime<Utc>> {
            v.and_then(|p| p.get(key))
                .and_then(|t| serde_json::from_value(t.clone()).ok())
        };

        let ledger = Self {
            base_session_energy_kwh: total(
                value.get("base_session_energy_kwh"),
                "base_session_energy_kwh",
            ),
            session_start_energy_kwh: total(
                value.get("session_start_energy_kwh"),
                "session_start_energy_kwh",
            ),
            session_energy_kwh: total(value.get("session_energy_kwh"), "session_energy_kwh"),
            monthly: MonthlyPeriod {
                month: monthly
                    .and_then(|m| m.get("month"))
                    .and_then(Value::as_u64)
                    .filter(|m| (1..=12).contains(m))
                    .map(|m| m as u32)
                    .unwrap_or(month),
                year: monthly
                    .and_then(|m| m.get("year"))
                    .and_then(Value::as_i64)
                    .map(|y| y as i32)
                    .unwrap_or(year),
                energy_kwh: total(monthly.and_then(|m| m.get("energy_kwh")), "monthly.energy_kwh"),
                last_reset: timestamp(monthly, "last_reset"),
                last_set: timestamp(monthly, "last_set"),
            },
            yearly: YearlyPeriod {
                year: yearly
                    .and_then(|y| y.get("year"))
                    .and_then(Value::as_i64)
                    .map(|y| y as i32)
                    .unwrap_or(year),
                energy_kwh: total(yearly.and_then(|y| y.get("energy_kwh")), "yearly.energy_kwh"),
                last_reset: timestamp(yearly, "last_reset"),
                last_set: timestamp(yearly, "last_set"),
            },
            last_month_energy_kwh: total(
                value.get("last_month_energy_kwh"),
                "last_month_energy_kwh",
            ),
            last_year_energy_kwh: total(
                value.get("last_year_energy_kwh"),
                "last_year_energy_kwh",
            ),
        };
        (ledger, invalid)
    }

    pub fn totals(&self) -> EnergyTotals {
        EnergyTotals {
            session_kwh: self.session_energy_kwh,
            monthly_kwh: self.monthly.energy_kwh,
            yearly_kwh: self.yearly.energy_kwh,
            last_month_kwh: self.last_month_energy_kwh,
            last_year_kwh: self.last_year_energy_kwh,
        }
    }

    fn fold(&mut self, kwh: f64) {
        self.monthly.energy_kwh += kwh;
        self.yearly.energy_kwh += kwh;
    }
}

/// Result of processing one snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum EnergyOutcome {
    /// Ledger committed; carries the published totals
    Updated(EnergyTotals),
    /// Counter not plausible; session fields left as they were
    Rejected(String),
}

/// Ledger change worked out for one snapshot, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyStep {
    /// Ledger to persist; `None` when nothing has to be written
    pub ledger: Option<EnergyLedger>,
    pub outcome: EnergyOutcome,
}

pub struct EnergyAccountant {
    store: Arc<dyn KeyValueStore>,
    key: String,
    ledger: EnergyLedger,
    tz: Tz,
    max_delta_kwh: f64,
    reset_tolerance_kwh: f64,
    logger: StructuredLogger,
}

impl EnergyAccountant {
    /// Restore the ledger for `device_id`, starting a fresh one when absent
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        device_id: &str,
        config: &EnergyConfig,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let key = format!("{}.energy", device_id);
        let logger = get_logger("energy");
        let local = now.with_timezone(&tz);

        let ledger = match store.get(&key)? {
            Some(value) => {
                let (ledger, invalid) =
                    EnergyLedger::from_stored(&value, local.month(), local.year());
                if !invalid.is_empty() {
                    logger.warn(&format!(
                        "Stored energy totals invalid, reset to zero: {}",
                        invalid.join(", ")
                    ));
                }
                ledger
            }
            None => {
                logger.info("No stored energy ledger, starting from zero");
                EnergyLedger::new(local.month(), local.year())
            }
        };

        Ok(Self {
            store,
            key,
            ledger,
            tz,
            max_delta_kwh: config.max_energy_delta_kwh,
            reset_tolerance_kwh: config.reset_tolerance_kwh,
            logger,
        })
    }

    pub fn ledger(&self) -> &EnergyLedger {
        &self.ledger
    }

    pub fn totals(&self) -> EnergyTotals {
        self.ledger.totals()
    }

    /// Store key holding this accountant's ledger
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Account one validated snapshot and persist the result
    pub fn process(
        &mut self,
        snapshot: &DeviceSnapshot,
        previous: ChargeState,
        current: ChargeState,
        now: DateTime<Utc>,
    ) -> Result<EnergyOutcome> {
        let step = self.evaluate(snapshot, previous, current, now);
        if let Some(ledger) = &step.ledger {
            self.store.set(&self.key, serde_json::to_value(ledger)?)?;
        }
        Ok(self.apply(step))
    }

    /// Adopt a step after its ledger has been persisted
    pub fn apply(&mut self, step: EnergyStep) -> EnergyOutcome {
        if let Some(ledger) = step.ledger {
            self.ledger = ledger;
        }
        step.outcome
    }

    /// Work out the ledger for one snapshot without touching the store
    pub fn evaluate(
        &self,
        snapshot: &DeviceSnapshot,
        previous: ChargeState,
        current: ChargeState,
        now: DateTime<Utc>,
    ) -> EnergyStep {
        let mut next = self.ledger.clone();
        let rolled = self.roll_periods(&mut next, now);
        let counter = snapshot.cumulative_energy_kwh;
        let last_known = next.session_energy_kwh;

        if !counter.is_finite() || counter < 0.0 {
            let reason = format!("counter {} is not a valid reading", counter);
            return self.rejected(next, rolled, reason);
        }

        if counter < last_known - self.reset_tolerance_kwh {
            self.logger.info(&format!(
                "Device counter reset detected ({:.3} -> {:.3} kWh)",
                last_known, counter
            ));
            if last_known > 0.0 {
                next.fold(last_known);
            }
            next.base_session_energy_kwh = 0.0;
            next.session_start_energy_kwh = 0.0;
            next.session_energy_kwh = counter;
            return updated(next);
        }

        if (counter - last_known).abs() > self.max_delta_kwh {
            return self.rejected(
                next,
                rolled,
                format!(
                    "counter jumped {:.3} -> {:.3} kWh, more than {} kWh",
                    last_known, counter, self.max_delta_kwh
                ),
            );
        }

        match current {
            ChargeState::Charging => {
                if previous != ChargeState::Charging {
                    next.session_start_energy_kwh = counter;
                }
                next.session_energy_kwh = next.base_session_energy_kwh + counter;
            }
            ChargeState::Connected => {
                if previous == ChargeState::Charging {
                    next.base_session_energy_kwh += counter;
                }
                next.session_energy_kwh = next.base_session_energy_kwh;
            }
            ChargeState::Disconnected => {
                if previous.is_plugged_in() {
                    let delta = counter - next.session_start_energy_kwh;
                    if delta >= self.max_delta_kwh {
                        self.logger.warn(&format!(
                            "Ignoring implausible session energy {:.3} kWh",
                            delta
                        ));
                    } else if delta > 0.0 {
                        self.logger
                            .info(&format!("Session finished with {:.3} kWh", delta));
                        next.fold(delta);
                    }
                }
                next.base_session_energy_kwh = 0.0;
                next.session_start_energy_kwh = 0.0;
                next.session_energy_kwh = 0.0;
            }
        }

        updated(next)
    }

    fn rejected(&self, next: EnergyLedger, rolled: bool, reason: String) -> EnergyStep {
        self.logger.warn(&format!("Energy reading rejected: {}", reason));
        EnergyStep {
            // `next` carries only the period rollover at this point
            ledger: rolled.then_some(next),
            outcome: EnergyOutcome::Rejected(reason),
        }
    }

    fn save(&mut self, next: EnergyLedger) -> Result<()> {
        self.store.set(&self.key, serde_json::to_value(&next)?)?;
        self.ledger = next;
        Ok(())
    }

    /// Move the monthly/yearly buckets to the period containing `now`
    fn roll_periods(&self, ledger: &mut EnergyLedger, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        let (month, year) = (local.month(), local.year());
        let mut rolled = false;

        if ledger.monthly.month != month || ledger.monthly.year != year {
            self.logger.info(&format!(
                "New month {}-{:02}, archiving {:.3} kWh",
                year, month, ledger.monthly.energy_kwh
            ));
            ledger.last_month_energy_kwh = ledger.monthly.energy_kwh;
            ledger.monthly.month = month;
            ledger.monthly.year = year;
            ledger.monthly.energy_kwh = 0.0;
            rolled = true;
        }

        if ledger.yearly.year != year {
            self.logger.info(&format!(
                "New year {}, archiving {:.3} kWh",
                year, ledger.yearly.energy_kwh
            ));
            ledger.last_year_energy_kwh = ledger.yearly.energy_kwh;
            ledger.yearly.year = year;
            ledger.yearly.energy_kwh = 0.0;
            rolled = true;
        }

        rolled
    }

    pub fn reset_monthly(&mut self, now: DateTime<Utc>) -> Result<EnergyTotals> {
        self.set_monthly_value(0.0, now, true)
    }

    pub fn reset_yearly(&mut self, now: DateTime<Utc>) -> Result<EnergyTotals> {
        self.set_yearly_value(0.0, now, true)
    }

    pub fn set_monthly(&mut self, value_kwh: f64, now: DateTime<Utc>) -> Result<EnergyTotals> {
        check_manual_value(value_kwh)?;
        self.set_monthly_value(value_kwh, now, false)
    }

    pub fn set_yearly(&mut self, value_kwh: f64, now: DateTime<Utc>) -> Result<EnergyTotals> {
        check_manual_value(value_kwh)?;
        self.set_yearly_value(value_kwh, now, false)
    }

    fn set_monthly_value(
        &mut self,
        value: f64,
        now: DateTime<Utc>,
        reset: bool,
    ) -> Result<EnergyTotals> {
        let mut next = self.ledger.clone();
        self.roll_periods(&mut next, now);
        next.last_month_energy_kwh = next.monthly.energy_kwh;
        next.monthly.energy_kwh = value;
        if reset {
            next.monthly.last_reset = Some(now);
        } else {
            next.monthly.last_set = Some(now);
        }
        self.logger.info(&format!(
            "Monthly energy {:.3} -> {:.3} kWh",
            next.last_month_energy_kwh, value
        ));
        let totals = next.totals();
        self.save(next)?;
        Ok(totals)
    }

    fn set_yearly_value(
        &mut self,
        value: f64,
        now: DateTime<Utc>,
        reset: bool,
    ) -> Result<EnergyTotals> {
        let mut next = self.ledger.clone();
        self.roll_periods(&mut next, now);
        next.last_year_energy_kwh = next.yearly.energy_kwh;
        next.yearly.energy_kwh = value;
        if reset {
            next.yearly.last_reset = Some(now);
        } else {
            next.yearly.last_set = Some(now);
        }
        self.logger.info(&format!(
            "Yearly energy {:.3} -> {:.3} kWh",
            next.last_year_energy_kwh, value
        ));
        let totals = next.totals();
        self.save(next)?;
        Ok(totals)
    }
}

fn updated(next: EnergyLedger) -> EnergyStep {
    EnergyStep {
        outcome: EnergyOutcome::Updated(next.totals()),
        ledger: Some(next),
    }
}

fn check_manual_value(value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(HestiaError::validation(
            "energy_kwh".to_string(),
            format!("must be a non-negative number, got {}", value),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn stored_garbage_is_zeroed() {
        let stored = json!({
            "base_session_energy_kwh": "abc",
            "session_start_energy_kwh": 1.0,
            "session_energy_kwh": -4.0,
            "monthly": {"month": 3, "year": 2026, "energy_kwh": 12.5},
            "yearly": {"year": 2026, "energy_kwh": 40.0},
            "last_month_energy_kwh": 9.0,
            "last_year_energy_kwh": 100.0
        });
        let (ledger, invalid) = EnergyLedger::from_stored(&stored, 3, 2026);
        assert_eq!(ledger.base_session_energy_kwh, 0.0);
        assert_eq!(ledger.session_start_energy_kwh, 1.0);
        assert_eq!(ledger.monthly.energy_kwh, 12.5);
        assert_eq!(invalid, vec!["base_session_energy_kwh", "session_energy_kwh"]);
    }

    #[test]
    fn year_rollover_archives_both_buckets() {
        let store = Arc::new(MemoryStore::new());
        let mut acc = EnergyAccountant::load(
            store,
            "wb",
            &EnergyConfig::default(),
            chrono_tz::UTC,
            at(2025, 12, 31),
        )
        .unwrap();
        acc.set_monthly(5.0, at(2025, 12, 31)).unwrap();
        acc.set_yearly(50.0, at(2025, 12, 31)).unwrap();

        acc.reset_monthly(at(2026, 1, 1)).unwrap();
        let l = acc.ledger();
        assert_eq!(l.yearly.year, 2026);
        assert_eq!(l.last_year_energy_kwh, 50.0);
        assert_eq!(l.yearly.energy_kwh, 0.0);
        assert_eq!(l.monthly.month, 1);
        assert!(l.monthly.last_reset.is_some());
    }

    #[test]
    fn evaluate_leaves_store_alone_until_applied() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut acc = EnergyAccountant::load(
            store.clone(),
            "wb",
            &EnergyConfig::default(),
            chrono_tz::UTC,
            at(2026, 5, 1),
        )
        .unwrap();
        let doc = json!({
            "ChargeState": 2,
            "ChargePower": 7400,
            "ChargeEnergy": 3.0,
            "Intensity": 16,
            "FirmwareVersion": "2.1.7"
        });
        let snapshot = crate::validator::TelemetryValidator::new(Default::default())
            .validate(&crate::telemetry::RawTelemetry::new(doc))
            .unwrap();

        let step = acc.evaluate(
            &snapshot,
            ChargeState::Connected,
            ChargeState::Charging,
            at(2026, 5, 1),
        );
        assert!(store.get(acc.key()).unwrap().is_none());
        assert_eq!(acc.ledger().session_energy_kwh, 0.0);

        let outcome = acc.apply(step);
        assert!(matches!(outcome, EnergyOutcome::Updated(t) if t.session_kwh == 3.0));
        assert_eq!(acc.ledger().session_energy_kwh, 3.0);
    }

    #[test]
    fn manual_values_must_be_non_negative() {
        let store = Arc::new(MemoryStore::new());
        let mut acc = EnergyAccountant::load(
            store,
            "wb",
            &EnergyConfig::default(),
            chrono_tz::UTC,
            at(2026, 5, 1),
        )
        .unwrap();
        assert!(acc.set_monthly(-1.0, at(2026, 5, 1)).is_err());
        assert!(acc.set_yearly(f64::NAN, at(2026, 5, 1)).is_err());
        assert_eq!(acc.ledger().monthly.energy_kwh, 0.0);
    }
}

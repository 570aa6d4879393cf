//! Snapshot client for the wallbox HTTP API
//!
//! One call to [`SnapshotClient::fetch`] performs at most one bounded request.
//! The client counts consecutive failures and classifies each failure as
//! transient or exhausted; retrying is left to the poll loop.

use crate::config::DeviceConfig;
use crate::error::{HestiaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::RawTelemetry;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Path of the telemetry document on the charger
pub const REALTIME_DATA_PATH: &str = "/RealTimeData";

/// Network transport to the charger
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Fetch and parse the real-time data document
    async fn fetch_json(&self) -> Result<serde_json::Value>;

    /// Write a single device parameter
    async fn write(&self, param: &str, value: &str) -> Result<()>;
}

/// `reqwest` based transport
#[cfg(feature = "http")]
pub struct HttpTelemetrySource {
    client: reqwest::Client,
    base_url: String,
    logger: StructuredLogger,
}

#[cfg(feature = "http")]
impl HttpTelemetrySource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hestia/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            logger: get_logger("http"),
        })
    }

    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        Self::new(&config.base_url(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(feature = "http")]
#[async_trait::async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn fetch_json(&self) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, REALTIME_DATA_PATH);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(HestiaError::network(format!(
                "GET {} returned {}",
                url,
                resp.status()
            )));
        }
        let body = resp.text().await?;
        let value: serde_json::Value = serde_json::from_str(&body)?;
        Ok(value)
    }

    async fn write(&self, param: &str, value: &str) -> Result<()> {
        let url = format!("{}/write/{}={}", self.base_url, param, value);
        self.logger.debug(&format!("Writing {}={}", param, value));
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(HestiaError::network(format!(
                "write {}={} returned {}",
                param,
                value,
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Failure of a single fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// Failure still within the consecutive error ceiling
    #[error("fetch failed ({consecutive} of {ceiling} allowed): {source}")]
    Transient {
        consecutive: u32,
        ceiling: u32,
        #[source]
        source: HestiaError,
    },

    /// The consecutive error ceiling has been exceeded
    #[error("device unreachable after {consecutive} consecutive failures: {source}")]
    Exhausted {
        consecutive: u32,
        #[source]
        source: HestiaError,
    },
}

impl FetchError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, FetchError::Exhausted { .. })
    }
}

/// Reachability as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Ok,
    Degraded(u32),
    Failed,
}

/// Failure counting wrapper around a [`TelemetrySource`]
pub struct SnapshotClient {
    source: Arc<dyn TelemetrySource>,
    request_timeout: Duration,
    max_consecutive_errors: u32,
    cache_freshness: Duration,
    consecutive_errors: u32,
    last_good: Option<(Instant, RawTelemetry)>,
    logger: StructuredLogger,
}

impl SnapshotClient {
    pub fn new(source: Arc<dyn TelemetrySource>, config: &DeviceConfig) -> Self {
        Self {
            source,
            request_timeout: config.request_timeout(),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            cache_freshness: config.cache_freshness(),
            consecutive_errors: 0,
            last_good: None,
            logger: get_logger("client"),
        }
    }

    /// Fetch one telemetry document
    pub async fn fetch(&mut self) -> std::result::Result<RawTelemetry, FetchError> {
        if let Some((at, doc)) = &self.last_good
            && at.elapsed() < self.cache_freshness
        {
            self.logger.trace("Serving telemetry from freshness cache");
            return Ok(doc.clone());
        }

        let outcome = tokio::time::timeout(self.request_timeout, self.source.fetch_json()).await;
        let result = match outcome {
            Ok(r) => r,
            Err(_) => Err(HestiaError::timeout(format!(
                "no response within {} ms",
                self.request_timeout.as_millis()
            ))),
        };

        match result {
            Ok(value) => {
                if self.consecutive_errors > 0 {
                    self.logger.info(&format!(
                        "Fetch succeeded after {} consecutive failures",
                        self.consecutive_errors
                    ));
                }
                self.consecutive_errors = 0;
                let raw = RawTelemetry::new(value);
                self.last_good = Some((Instant::now(), raw.clone()));
                Ok(raw)
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    fn record_failure(&mut self, source: HestiaError) -> FetchError {
        self.last_good = None;
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors > self.max_consecutive_errors {
            FetchError::Exhausted {
                consecutive: self.consecutive_errors,
                source,
            }
        } else {
            FetchError::Transient {
                consecutive: self.consecutive_errors,
                ceiling: self.max_consecutive_errors,
                source,
            }
        }
    }

    /// Write a device parameter; does not affect the failure counter
    pub async fn write_parameter(&mut self, param: &str, value: &str) -> Result<()> {
        let outcome = tokio::time::timeout(self.request_timeout, self.source.write(param, value))
            .await
            .map_err(|_| {
                HestiaError::timeout(format!("write {}={} timed out", param, value))
            })?;
        outcome?;
        // Next read must observe the new value
        self.last_good = None;
        self.logger.info(&format!("Set {} to {}", param, value));
        Ok(())
    }

    pub fn error_count(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn is_in_error_state(&self) -> bool {
        self.consecutive_errors > self.max_consecutive_errors
    }

    pub fn connectivity(&self) -> ConnectivityState {
        match self.consecutive_errors {
            0 => ConnectivityState::Ok,
            n if n <= self.max_consecutive_errors => ConnectivityState::Degraded(n),
            _ => ConnectivityState::Failed,
        }
    }
}

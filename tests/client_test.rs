use hestia::client::{ConnectivityState, FetchError, SnapshotClient, TelemetrySource};
use hestia::config::DeviceConfig;
use hestia::error::{HestiaError, Result};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source replaying a fixed list of replies
struct Scripted {
    replies: Mutex<VecDeque<Result<Value>>>,
}

impl Scripted {
    fn new(replies: Vec<Result<Value>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
        })
    }
}

#[async_trait::async_trait]
impl TelemetrySource for Scripted {
    async fn fetch_json(&self) -> Result<Value> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(HestiaError::network("connection refused")))
    }

    async fn write(&self, _param: &str, _value: &str) -> Result<()> {
        Err(HestiaError::network("connection refused"))
    }
}

/// Source that never answers
struct Silent;

#[async_trait::async_trait]
impl TelemetrySource for Silent {
    async fn fetch_json(&self) -> Result<Value> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!({}))
    }

    async fn write(&self, _param: &str, _value: &str) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

fn config(ceiling: u32) -> DeviceConfig {
    DeviceConfig {
        max_consecutive_errors: ceiling,
        cache_freshness_ms: 0,
        ..DeviceConfig::default()
    }
}

#[tokio::test]
async fn ceiling_of_three() {
    let mut client = SnapshotClient::new(Scripted::new(vec![]), &config(3));

    let e1 = client.fetch().await.unwrap_err();
    assert!(matches!(e1, FetchError::Transient { consecutive: 1, .. }));
    assert!(!client.is_in_error_state());
    assert_eq!(client.connectivity(), ConnectivityState::Degraded(1));

    let e2 = client.fetch().await.unwrap_err();
    assert!(matches!(e2, FetchError::Transient { consecutive: 2, .. }));
    assert!(!client.is_in_error_state());

    let e3 = client.fetch().await.unwrap_err();
    assert!(matches!(e3, FetchError::Transient { consecutive: 3, .. }));
    assert!(!client.is_in_error_state());
    assert_eq!(client.connectivity(), ConnectivityState::Degraded(3));

    let e4 = client.fetch().await.unwrap_err();
    assert!(matches!(e4, FetchError::Exhausted { consecutive: 4, .. }));
    assert!(client.is_in_error_state());
    assert_eq!(client.connectivity(), ConnectivityState::Failed);
    assert_eq!(client.error_count(), 4);
}

#[tokio::test]
async fn recovery_clears_error_state() {
    let src = Scripted::new(vec![
        Err(HestiaError::network("a")),
        Err(HestiaError::network("b")),
        Err(HestiaError::network("c")),
        Ok(json!({"ChargeState": 0})),
    ]);
    let mut client = SnapshotClient::new(src, &config(2));
    client.fetch().await.unwrap_err();
    client.fetch().await.unwrap_err();
    assert!(!client.is_in_error_state());
    client.fetch().await.unwrap_err();
    assert!(client.is_in_error_state());

    client.fetch().await.unwrap();
    assert_eq!(client.error_count(), 0);
    assert!(!client.is_in_error_state());
}

#[tokio::test(start_paused = true)]
async fn hanging_device_times_out() {
    let mut client = SnapshotClient::new(Arc::new(Silent), &config(20));
    let err = client.fetch().await.unwrap_err();
    match err {
        FetchError::Transient { source, .. } => {
            assert!(matches!(source, HestiaError::Timeout { .. }))
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.error_count(), 1);
}

#[tokio::test]
async fn write_failure_does_not_count() {
    let mut client = SnapshotClient::new(Scripted::new(vec![]), &config(3));
    assert!(client.write_parameter("Paused", "1").await.is_err());
    assert_eq!(client.error_count(), 0);
    assert_eq!(client.connectivity(), ConnectivityState::Ok);
}

use hestia::client::FetchError;
use hestia::error::HestiaError;
use std::error::Error;

#[test]
fn error_constructors_group_1() {
    assert!(matches!(HestiaError::config("x"), HestiaError::Config { .. }));
    let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(
        HestiaError::from(bad_json),
        HestiaError::Serialization { .. }
    ));
    assert!(matches!(HestiaError::io("x"), HestiaError::Io { .. }));
    assert!(matches!(
        HestiaError::network("x"),
        HestiaError::Network { .. }
    ));
}

#[test]
fn error_constructors_group_2() {
    assert!(matches!(
        HestiaError::persistence("x"),
        HestiaError::Persistence { .. }
    ));
    assert!(matches!(
        HestiaError::validation("f", "m"),
        HestiaError::Validation { .. }
    ));
    assert!(matches!(
        HestiaError::timeout("x"),
        HestiaError::Timeout { .. }
    ));
    assert!(matches!(
        HestiaError::stopped("x"),
        HestiaError::Stopped { .. }
    ));
    assert!(matches!(
        HestiaError::generic("x"),
        HestiaError::Generic { .. }
    ));
}

#[test]
fn conversions_from_library_errors() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    assert!(matches!(HestiaError::from(io), HestiaError::Io { .. }));

    let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(
        HestiaError::from(json),
        HestiaError::Serialization { .. }
    ));
}

#[test]
fn fetch_error_keeps_cause() {
    let err = FetchError::Exhausted {
        consecutive: 3,
        source: HestiaError::network("refused"),
    };
    assert!(err.is_exhausted());
    assert!(format!("{}", err).contains("3 consecutive failures"));
    let cause = err.source().map(|e| e.to_string()).unwrap_or_default();
    assert!(cause.contains("refused"));
}

use hestia::logging::{LogContext, get_logger, get_logger_with_context, parse_log_level};
use tracing::Level;

#[test]
fn parse_levels_case_insensitive() {
    assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
    assert_eq!(parse_log_level("Warn").unwrap(), Level::WARN);
    assert!(parse_log_level("verbose").is_err());
}

#[test]
fn loggers_accept_context() {
    let ctx = LogContext::new("energy")
        .with_device_id("garage")
        .with_session_id("abc".to_string())
        .with_field("phase", "1".to_string());
    let logger = get_logger_with_context(ctx);
    logger.info("with context");
    logger.for_session(None).debug("without session");
    get_logger("plain").warn("plain logger");
}

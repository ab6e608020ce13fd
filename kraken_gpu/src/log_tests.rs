//! Unit tests for the logging system
//!
//! Tests install a global logger, so they are serialized with `serial_test`.

use crate::error::Error;
use crate::log::{set_logger, reset_logger, CaptureLogger, LogSeverity};
use serial_test::serial;

// ============================================================================
// SEVERITY TESTS
// ============================================================================

#[test]
fn test_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

// ============================================================================
// CAPTURE LOGGER TESTS
// ============================================================================

// Other tests in this binary log through the global logger concurrently,
// so assertions match on unique message text rather than bare severity
// counts.

#[test]
#[serial]
fn test_capture_logger_records_entries() {
    let capture = CaptureLogger::new();
    set_logger(capture.clone());

    crate::gpu_info!("kraken::gpu::test", "log_test info marker {}", 42);
    crate::gpu_warn!("kraken::gpu::test", "log_test warn marker");

    assert_eq!(capture.count_matching(LogSeverity::Info, "log_test info marker 42"), 1);
    assert_eq!(capture.count_matching(LogSeverity::Warn, "log_test warn marker"), 1);

    reset_logger();
}

#[test]
#[serial]
fn test_error_macro_includes_file_line() {
    let capture = CaptureLogger::new();
    set_logger(capture.clone());

    crate::gpu_error!("kraken::gpu::test", "log_test broken: {}", "badness");

    let entries = capture.entries();
    let entry = entries
        .iter()
        .find(|e| e.message == "log_test broken: badness")
        .expect("entry captured");
    assert_eq!(entry.severity, LogSeverity::Error);
    assert!(entry.file.is_some());
    assert!(entry.line.is_some());

    reset_logger();
}

#[test]
#[serial]
fn test_gpu_err_produces_error_value_and_logs() {
    let capture = CaptureLogger::new();
    set_logger(capture.clone());

    let err = crate::gpu_err!("kraken::gpu::test", "log_test stale handle {}", 7);
    match err {
        Error::BackendError(msg) => assert_eq!(msg, "log_test stale handle 7"),
        other => panic!("unexpected error variant: {:?}", other),
    }
    assert_eq!(capture.count_matching(LogSeverity::Error, "log_test stale handle 7"), 1);

    reset_logger();
}

#[test]
#[serial]
fn test_gpu_bail_returns_early() {
    let capture = CaptureLogger::new();
    set_logger(capture.clone());

    fn fails() -> crate::error::Result<()> {
        crate::gpu_bail!("kraken::gpu::test", "log_test cannot continue");
    }

    assert!(fails().is_err());
    assert_eq!(capture.count_matching(LogSeverity::Error, "log_test cannot continue"), 1);

    reset_logger();
}

#[test]
#[serial]
fn test_capture_logger_clear() {
    let capture = CaptureLogger::new();
    set_logger(capture.clone());

    crate::gpu_warn!("kraken::gpu::test", "log_test cleared marker");
    assert_eq!(capture.count_matching(LogSeverity::Warn, "log_test cleared marker"), 1);
    capture.clear();
    assert_eq!(capture.count_matching(LogSeverity::Warn, "log_test cleared marker"), 0);

    reset_logger();
}

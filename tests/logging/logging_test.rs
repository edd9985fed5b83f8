//! Tests for `src/logging.rs`.

use herald::logging::{LoggingGuard, LOG_FILE_PREFIX};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn production_logging_creates_dir_and_installs_once() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    let guard = herald::logging::init_production(&logs_dir).expect("first init succeeds");
    assert!(logs_dir.exists(), "logs directory should be created");
    assert_eq!(guard.log_dir(), logs_dir.as_path());

    tracing::info!(contact = "5550100", "sample line");
    drop(guard);
    let written = std::fs::read_dir(&logs_dir)
        .expect("read logs dir")
        .filter_map(Result::ok)
        .any(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX));
    assert!(written, "rotated log file should exist");

    let again = herald::logging::init_production(&tmp.path().join("other"));
    assert!(again.is_err(), "a second global subscriber is rejected");
}

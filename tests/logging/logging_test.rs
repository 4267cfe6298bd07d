//! Tests for `src/logging.rs`.

use channel_relay::logging::{self, LoggingGuard, LOG_FILE_PREFIX};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn default_logs_dir_is_under_config_dir() {
    let dir = match logging::default_logs_dir() {
        Ok(dir) => dir,
        Err(err) => panic!("logs dir should resolve: {err}"),
    };
    assert!(dir.ends_with(".channel-relay/logs"));
}

#[test]
fn log_files_are_named_after_the_binary() {
    assert!(LOG_FILE_PREFIX.starts_with("channel-relay"));
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("nested").join("logs");
    assert!(!logs_dir.exists());

    // The global subscriber can only be installed once per process; this is
    // the only test in this binary that installs it.
    let guard = logging::init_production(&logs_dir);
    assert!(guard.is_ok());
    assert!(logs_dir.exists(), "logs directory should be created");
}

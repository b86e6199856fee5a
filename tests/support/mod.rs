#![allow(dead_code)]

use std::time::Duration;

/// Initialize test logging; safe to call from every test.
pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Return a `Duration` representing the given number of milliseconds
pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

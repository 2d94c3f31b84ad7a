// Shared across test binaries; not every binary uses every helper.
#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

/// Polls `condition` every 100 ms until it holds or `deadline` elapses.
pub fn eventually(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    condition()
}

/// Installs the test logger; safe to call from every test.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

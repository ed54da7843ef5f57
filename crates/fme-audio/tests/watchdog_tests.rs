//! Watchdog timer tests, exercised through the crate's public API against a
//! virtual `TestClock` so timing is deterministic.

use fme_audio::WatchdogTimer;
use fme_foundation::clock::{real_clock, test_clock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn watchdog_not_triggered_initially() {
    let wd = WatchdogTimer::new(Duration::from_secs(5));
    assert!(!wd.is_triggered());
}

#[test]
fn watchdog_feed_resets_trigger() {
    let wd = WatchdogTimer::new_with_clock(Duration::from_secs(5), real_clock());
    wd.feed();
    assert!(!wd.is_triggered());
}

#[test]
fn watchdog_triggers_when_starved() {
    let clock = test_clock();
    let mut wd = WatchdogTimer::new_with_clock(Duration::from_secs(2), Arc::clone(&clock));

    let running = Arc::new(AtomicBool::new(true));
    wd.feed();
    wd.start(Arc::clone(&running));

    // The watchdog thread's own `clock.sleep` calls advance the virtual
    // clock, so it notices the stale feed without any real delay.
    std::thread::sleep(Duration::from_millis(50));

    running.store(false, Ordering::SeqCst);
    wd.stop();

    assert!(wd.is_triggered());
}

#[test]
fn stopping_clears_the_trigger_and_joins_the_thread() {
    let clock = test_clock();
    let mut wd = WatchdogTimer::new_with_clock(Duration::from_millis(1), clock);
    let running = Arc::new(AtomicBool::new(true));
    wd.start(Arc::clone(&running));

    std::thread::sleep(Duration::from_millis(50));
    running.store(false, Ordering::SeqCst);
    wd.stop();

    assert!(!wd.is_triggered());
}

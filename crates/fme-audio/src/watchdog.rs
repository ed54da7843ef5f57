//! Silence watchdog, SPEC_FULL.md §4.1: flags prolonged gaps between fed
//! samples without deciding what to do about it — that policy call belongs
//! to the supervisor (SPEC_FULL.md §4.8), this timer only raises the flag.
//!
//! Built on the shared `WallClock` abstraction so tests can advance a
//! virtual clock instead of sleeping on a real one.

use fme_foundation::clock::{real_clock, SharedClock};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct WatchdogTimer {
    timeout: Duration,
    clock: SharedClock,
    last_feed: Arc<RwLock<Option<Instant>>>,
    triggered: Arc<AtomicBool>,
    handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl WatchdogTimer {
    pub fn new(timeout: Duration) -> Self {
        Self::new_with_clock(timeout, real_clock())
    }

    pub fn new_with_clock(timeout: Duration, clock: SharedClock) -> Self {
        Self {
            timeout,
            clock,
            last_feed: Arc::new(RwLock::new(None)),
            triggered: Arc::new(AtomicBool::new(false)),
            handle: Arc::new(RwLock::new(None)),
        }
    }

    pub fn start(&mut self, running: Arc<AtomicBool>) {
        let timeout = self.timeout;
        let clock = Arc::clone(&self.clock);
        let last_feed = Arc::clone(&self.last_feed);
        let triggered = Arc::clone(&self.triggered);

        *last_feed.write() = Some(clock.now());

        let handle = thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                clock.sleep(Duration::from_secs(1));

                let now = clock.now();
                let elapsed = {
                    let guard = last_feed.read();
                    guard.map(|last_time| now.duration_since(last_time))
                };

                if let Some(elapsed) = elapsed {
                    if elapsed > timeout && !triggered.load(Ordering::SeqCst) {
                        tracing::error!(?elapsed, "watchdog: no audio data within timeout");
                        triggered.store(true, Ordering::SeqCst);
                    }
                }
            }
        });

        *self.handle.write() = Some(handle);
    }

    pub fn feed(&self) {
        *self.last_feed.write() = Some(self.clock.now());
        self.triggered.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.write().take() {
            let _ = handle.join();
        }
        self.triggered.store(false, Ordering::SeqCst);
        *self.last_feed.write() = None;
    }
}

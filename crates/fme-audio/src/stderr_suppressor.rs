//! Suppresses the stderr chatter ALSA/JACK backends emit while probing PCM
//! plugins during device enumeration and stream negotiation.
//!
//! Per SPEC_FULL.md §9, suppression is reference-counted: the Capture Reader
//! and the device-listing CLI path can both want stderr muted at once, and
//! the real file descriptor must only be restored once the last guard drops.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Mutex;

static SUPPRESS_COUNT: AtomicUsize = AtomicUsize::new(0);
static SAVED_STDERR_FD: AtomicI32 = AtomicI32::new(-1);
static GUARD_LOCK: Mutex<()> = Mutex::new(());

/// RAII guard that redirects stderr to `/dev/null` for as long as any guard
/// is alive, and restores it when the last one drops.
pub struct StderrSuppressor {
    _private: (),
}

impl StderrSuppressor {
    pub fn new() -> io::Result<Self> {
        let _lock = GUARD_LOCK.lock().unwrap();
        if SUPPRESS_COUNT.fetch_add(1, Ordering::SeqCst) == 0 {
            // SAFETY: STDERR_FILENO (2) is always a valid fd in a Unix process.
            // `dup` duplicates it so we can restore it later; `dup2` atomically
            // replaces the live stderr fd with `/dev/null`'s fd.
            unsafe {
                let saved = libc::dup(libc::STDERR_FILENO);
                if saved < 0 {
                    SUPPRESS_COUNT.fetch_sub(1, Ordering::SeqCst);
                    return Err(io::Error::last_os_error());
                }
                let devnull = File::open("/dev/null")?;
                if libc::dup2(devnull.as_raw_fd(), libc::STDERR_FILENO) < 0 {
                    let _ = File::from_raw_fd(saved); // close the dup before bailing
                    SUPPRESS_COUNT.fetch_sub(1, Ordering::SeqCst);
                    return Err(io::Error::last_os_error());
                }
                SAVED_STDERR_FD.store(saved, Ordering::SeqCst);
            }
        }
        Ok(Self { _private: () })
    }

    pub fn with_suppressed<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        match Self::new() {
            Ok(guard) => {
                let result = f();
                drop(guard);
                result
            }
            Err(_) => f(),
        }
    }
}

impl Drop for StderrSuppressor {
    fn drop(&mut self) {
        let _lock = GUARD_LOCK.lock().unwrap();
        if SUPPRESS_COUNT.fetch_sub(1, Ordering::SeqCst) == 1 {
            let saved = SAVED_STDERR_FD.swap(-1, Ordering::SeqCst);
            if saved >= 0 {
                // SAFETY: `saved` was produced by `dup` in `new` and has not
                // been closed since; Drop must not panic, so restoration
                // failures here are ignored.
                unsafe {
                    libc::dup2(saved, libc::STDERR_FILENO);
                    libc::close(saved);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_guards_restore_once_outer_drops() {
        let outer = StderrSuppressor::new().unwrap();
        let inner = StderrSuppressor::new().unwrap();
        assert_eq!(SUPPRESS_COUNT.load(Ordering::SeqCst), 2);
        drop(inner);
        assert_eq!(SUPPRESS_COUNT.load(Ordering::SeqCst), 1);
        drop(outer);
        assert_eq!(SUPPRESS_COUNT.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn with_suppressed_returns_closure_value() {
        let result = StderrSuppressor::with_suppressed(|| 42);
        assert_eq!(result, 42);
    }
}

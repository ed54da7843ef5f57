//! Pipeline-wide counters, SPEC_FULL.md §4.8's periodic metrics logging.
//!
//! Same atomic-counter-bundle idiom as the teacher's pipeline metrics: one
//! `Arc<AtomicU64>` per thing worth counting, `Relaxed` ordering throughout
//! since these are monitoring counters, not synchronization primitives.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct PipelineMetrics {
    pub frames_captured: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub tones_found: Arc<AtomicU64>,
    pub sequences_validated: Arc<AtomicU64>,
    pub sequences_dispatched: Arc<AtomicU64>,
    pub sequences_rejected: Arc<AtomicU64>,
    pub clips_delivered: Arc<AtomicU64>,

    pub capture_queue_depth: Arc<AtomicUsize>,
    pub preserver_pending_captures: Arc<AtomicUsize>,
    pub preserver_retained_samples: Arc<AtomicUsize>,
    pub silence_watchdog_triggered: Arc<AtomicBool>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tone_found(&self) {
        self.tones_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sequence_validated(&self) {
        self.sequences_validated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sequence_dispatched(&self) {
        self.sequences_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sequence_rejected(&self) {
        self.sequences_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clip_delivered(&self) {
        self.clips_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_capture_queue_depth(&self, depth: usize) {
        self.capture_queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn set_preserver_state(&self, pending: usize, retained_samples: usize) {
        self.preserver_pending_captures.store(pending, Ordering::Relaxed);
        self.preserver_retained_samples.store(retained_samples, Ordering::Relaxed);
    }

    /// Records whether the capture watchdog currently sees a silence gap
    /// past its configured timeout. Flagging only; the supervisor decides
    /// what, if anything, to do about it.
    pub fn set_silence_watchdog(&self, triggered: bool) {
        self.silence_watchdog_triggered.store(triggered, Ordering::Relaxed);
    }

    /// Logs a one-line snapshot at `info`, the way the supervisor's
    /// periodic tick does per SPEC_FULL.md §4.8.
    pub fn log_snapshot(&self) {
        tracing::info!(
            frames_captured = self.frames_captured.load(Ordering::Relaxed),
            frames_dropped = self.frames_dropped.load(Ordering::Relaxed),
            tones_found = self.tones_found.load(Ordering::Relaxed),
            sequences_validated = self.sequences_validated.load(Ordering::Relaxed),
            sequences_dispatched = self.sequences_dispatched.load(Ordering::Relaxed),
            sequences_rejected = self.sequences_rejected.load(Ordering::Relaxed),
            clips_delivered = self.clips_delivered.load(Ordering::Relaxed),
            capture_queue_depth = self.capture_queue_depth.load(Ordering::Relaxed),
            preserver_pending = self.preserver_pending_captures.load(Ordering::Relaxed),
            silence_watchdog = self.silence_watchdog_triggered.load(Ordering::Relaxed),
            "pipeline metrics snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.frames_captured.load(Ordering::Relaxed), 0);
        metrics.record_frame_captured();
        metrics.record_frame_captured();
        assert_eq!(metrics.frames_captured.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn clone_shares_the_same_underlying_counters() {
        let metrics = PipelineMetrics::new();
        let cloned = metrics.clone();
        metrics.record_tone_found();
        assert_eq!(cloned.tones_found.load(Ordering::Relaxed), 1);
    }
}

//! Sequence Dispatcher, SPEC_FULL.md §4.7.
//!
//! The registered-callback-list idiom is the same one
//! `fme_foundation::health::HealthMonitor` uses for health checks: a
//! `parking_lot::RwLock<Vec<Arc<dyn Trait>>>` that callers register against.
//! Per spec.md §9's "Boost signals/slots" note, emission copies the list
//! under the lock and invokes outside it, so a slow or reentrant listener
//! never blocks a concurrent registration or sink swap.
//!
//! The sequence sink itself holds one flavor at a time, full or summary, per
//! spec.md §4.7's "the supervisor may replace the dispatcher instance at
//! runtime to switch between flavors" and §9's "the supervisor holds one
//! such sink and swaps it atomically" — modeled here as `replace_sink`
//! swapping the `SequenceSink` the dispatcher holds, rather than the
//! supervisor swapping the whole dispatcher object.

use fme_foundation::DispatchError;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::preserver::PreservedClip;
use crate::types::{Sequence, SequenceSummary};

pub trait SequenceListener: Send + Sync {
    fn on_sequence(&self, sequence: &Sequence);
}

pub trait SummaryListener: Send + Sync {
    fn on_summary(&self, summary: &SequenceSummary);
}

/// Receives post-trigger audio clips once the Audio Preserver's recording
/// window closes, the `onRecordedAudio` callback.
pub trait ClipListener: Send + Sync {
    fn on_recorded_audio(&self, clip: &PreservedClip);
}

/// The two sequence-sink flavors from spec.md §4.7. A dispatcher holds
/// exactly one at a time; the supervisor builds the flavor it wants and
/// swaps it in with `SequenceDispatcher::replace_sink`.
pub enum SequenceSink {
    Full(Vec<Arc<dyn SequenceListener>>),
    Summary(Vec<Arc<dyn SummaryListener>>),
}

pub struct SequenceDispatcher {
    sink: RwLock<SequenceSink>,
    clips: RwLock<Vec<Arc<dyn ClipListener>>>,
}

impl SequenceDispatcher {
    pub fn new(sink: SequenceSink) -> Self {
        Self {
            sink: RwLock::new(sink),
            clips: RwLock::new(Vec::new()),
        }
    }

    /// Atomically swaps the active sink flavor, per spec.md §9's "the
    /// supervisor holds one such sink and swaps it atomically."
    pub fn replace_sink(&self, sink: SequenceSink) {
        *self.sink.write() = sink;
    }

    pub fn register_clip(&self, listener: Arc<dyn ClipListener>) {
        self.clips.write().push(listener);
    }

    /// Fans `clip` out to every registered clip listener. Unlike `dispatch`,
    /// an empty listener list is not an error: recording is optional and a
    /// gateway with no recorder configured never produces clips at all.
    pub fn dispatch_clip(&self, clip: &PreservedClip) {
        let listeners = self.clips.read().clone();
        for listener in listeners.iter() {
            listener.on_recorded_audio(clip);
        }
    }

    /// Fans `sequence` out to whichever sink flavor is currently active.
    /// Errs only when the active flavor has no listeners registered, which
    /// usually indicates a misconfigured supervisor rather than a transient
    /// condition.
    pub fn dispatch(&self, sequence: Sequence) -> Result<(), DispatchError> {
        enum Snapshot {
            Full(Vec<Arc<dyn SequenceListener>>),
            Summary(Vec<Arc<dyn SummaryListener>>),
        }

        let snapshot = match &*self.sink.read() {
            SequenceSink::Full(listeners) => Snapshot::Full(listeners.clone()),
            SequenceSink::Summary(listeners) => Snapshot::Summary(listeners.clone()),
        };

        match snapshot {
            Snapshot::Full(listeners) => {
                if listeners.is_empty() {
                    return Err(DispatchError::NoSink);
                }
                for listener in &listeners {
                    listener.on_sequence(&sequence);
                }
            }
            Snapshot::Summary(listeners) => {
                if listeners.is_empty() {
                    return Err(DispatchError::NoSink);
                }
                let view = SequenceSummary::from(&sequence);
                for listener in &listeners {
                    listener.on_summary(&view);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fme_foundation::CalcTime;
    use parking_lot::Mutex;
    use std::time::Instant;

    struct Recorder(Mutex<Vec<Vec<u8>>>);

    impl SummaryListener for Recorder {
        fn on_summary(&self, summary: &SequenceSummary) {
            self.0.lock().push(summary.digits.clone());
        }
    }

    fn sample_sequence() -> Sequence {
        Sequence {
            reference_start: Instant::now(),
            calc_start: CalcTime::new(0, 8_000),
            code: crate::types::CodeData {
                tones: vec![crate::types::CodeTone {
                    digit: 2,
                    length_secs: 0.08,
                    period_secs: 0.0,
                    frequency: 1_060.0,
                    peak_level: 1.0,
                }],
            },
            info: None,
        }
    }

    #[test]
    fn fans_out_to_all_registered_summary_listeners() {
        let dispatcher = SequenceDispatcher::new(SequenceSink::Summary(Vec::new()));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        dispatcher.replace_sink(SequenceSink::Summary(vec![recorder.clone()]));

        dispatcher.dispatch(sample_sequence()).unwrap();
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn errors_when_nothing_registered() {
        let dispatcher = SequenceDispatcher::new(SequenceSink::Summary(Vec::new()));
        assert!(matches!(
            dispatcher.dispatch(sample_sequence()),
            Err(DispatchError::NoSink)
        ));
    }

    #[test]
    fn replace_sink_switches_flavor_at_runtime() {
        let dispatcher = SequenceDispatcher::new(SequenceSink::Summary(Vec::new()));
        let full_recorder = Arc::new(FullRecorder(Mutex::new(0)));
        dispatcher.replace_sink(SequenceSink::Full(vec![full_recorder.clone()]));

        dispatcher.dispatch(sample_sequence()).unwrap();
        assert_eq!(*full_recorder.0.lock(), 1);
    }

    struct FullRecorder(Mutex<usize>);

    impl SequenceListener for FullRecorder {
        fn on_sequence(&self, _sequence: &Sequence) {
            *self.0.lock() += 1;
        }
    }

    struct ClipRecorder(Mutex<usize>);

    impl ClipListener for ClipRecorder {
        fn on_recorded_audio(&self, _clip: &PreservedClip) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn dispatch_clip_is_fine_with_no_listeners() {
        let dispatcher = SequenceDispatcher::new(SequenceSink::Summary(Vec::new()));
        let clip = PreservedClip {
            sequence: sample_sequence(),
            samples: vec![],
            sample_rate: 8_000,
            clip_start: CalcTime::new(0, 8_000),
        };
        dispatcher.dispatch_clip(&clip); // must not panic or error
    }

    #[test]
    fn dispatch_clip_fans_out_to_registered_listeners() {
        let dispatcher = SequenceDispatcher::new(SequenceSink::Summary(Vec::new()));
        let recorder = Arc::new(ClipRecorder(Mutex::new(0)));
        dispatcher.register_clip(recorder.clone());

        let clip = PreservedClip {
            sequence: sample_sequence(),
            samples: vec![0.0; 10],
            sample_rate: 8_000,
            clip_start: CalcTime::new(0, 8_000),
        };
        dispatcher.dispatch_clip(&clip);
        assert_eq!(*recorder.0.lock(), 1);
    }
}

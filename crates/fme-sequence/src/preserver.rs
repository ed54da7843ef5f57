//! Audio Preserver, SPEC_FULL.md §4.6.
//!
//! Grounded line-for-line on `original_source/Core/AudioSignalPreserver.h`'s
//! merge/deliver/trim tick cycle and its three parameter validation rules
//! (already implemented as `RecordingWindow::validate` in
//! `fme_foundation::config`, reused here rather than duplicated).

use fme_audio::RecordFrame;
use fme_foundation::{CalcTime, PreserverError, RecordingWindow};
use std::collections::{BTreeMap, VecDeque};

use crate::types::Sequence;

/// A delivered post-trigger clip: the recording-branch samples spanning
/// `[seqStart + recordLower, seqStart + recordUpper]`.
pub struct PreservedClip {
    pub sequence: Sequence,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub clip_start: CalcTime,
}

pub struct AudioPreserver {
    window: RecordingWindow,
    sample_rate: u32,
    deque: VecDeque<(CalcTime, f32)>,
    pending: BTreeMap<CalcTime, Sequence>,
}

impl AudioPreserver {
    pub fn new(window: RecordingWindow, sample_rate: u32) -> Result<Self, PreserverError> {
        window.validate()?;
        Ok(Self {
            window,
            sample_rate,
            deque: VecDeque::new(),
            pending: BTreeMap::new(),
        })
    }

    /// One merge/deliver/trim cycle. `frame` is the latest recording-branch
    /// signal (if any arrived this tick); `sequences` are newly validated
    /// sequences to start tracking.
    pub fn tick(&mut self, frame: Option<RecordFrame>, sequences: Vec<Sequence>) -> Vec<PreservedClip> {
        if let Some(frame) = frame {
            for (i, &sample) in frame.samples.iter().enumerate() {
                self.deque.push_back((frame.calc_time.advance(i as u64), sample));
            }
        }
        for seq in sequences {
            self.pending.insert(seq.calc_start, seq);
        }

        let latest_time = self.deque.back().map(|(t, _)| t.as_seconds());
        let mut delivered = Vec::new();
        if let Some(latest) = latest_time {
            let ready_starts: Vec<CalcTime> = self
                .pending
                .iter()
                .filter(|(start, _)| start.as_seconds() + self.window.record_upper_secs <= latest)
                .map(|(start, _)| *start)
                .collect();

            for start in ready_starts {
                let sequence = self.pending.remove(&start).expect("key observed above");
                let lo = start.as_seconds() + self.window.record_lower_secs;
                let hi = start.as_seconds() + self.window.record_upper_secs;
                let samples: Vec<f32> = self
                    .deque
                    .iter()
                    .filter(|(t, _)| {
                        let s = t.as_seconds();
                        s >= lo && s <= hi
                    })
                    .map(|(_, s)| *s)
                    .collect();
                let clip_start = self
                    .deque
                    .iter()
                    .find(|(t, _)| t.as_seconds() >= lo)
                    .map(|(t, _)| *t)
                    .unwrap_or_else(|| CalcTime::new(0, self.sample_rate));
                delivered.push(PreservedClip {
                    sequence,
                    samples,
                    sample_rate: self.sample_rate,
                    clip_start,
                });
            }
        }

        self.trim();
        delivered
    }

    fn trim(&mut self) {
        let cutoff = match self.pending.keys().next() {
            Some(earliest) => earliest.as_seconds() - self.window.record_buffer_secs,
            None => {
                let Some((latest, _)) = self.deque.back() else { return };
                latest.as_seconds() - self.window.record_buffer_secs
            }
        };
        while self
            .deque
            .front()
            .map(|(t, _)| t.as_seconds() < cutoff)
            .unwrap_or(false)
        {
            self.deque.pop_front();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn retained_samples(&self) -> usize {
        self.deque.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn window() -> RecordingWindow {
        RecordingWindow {
            record_lower_secs: -0.6,
            record_upper_secs: 1.9,
            record_buffer_secs: 1.6,
        }
    }

    fn sequence_at(secs: f64, rate: u32) -> Sequence {
        Sequence {
            reference_start: Instant::now(),
            calc_start: CalcTime::new((secs * rate as f64).round() as u64, rate),
            code: crate::types::CodeData { tones: vec![] },
            info: None,
        }
    }

    #[test]
    fn scenario_7_preserver_slice() {
        let rate = 8_000u32;
        let mut preserver = AudioPreserver::new(window(), rate).unwrap();

        // 10s of white-noise-ish stand-in audio, fed in 1s chunks.
        for second in 0..10u64 {
            let samples: Vec<f32> = (0..rate).map(|i| ((i + second as u32) % 7) as f32 / 7.0).collect();
            let frame = RecordFrame {
                samples,
                calc_time: CalcTime::new(second * rate as u64, rate),
                sample_rate: rate,
            };
            let seqs = if second == 5 { vec![sequence_at(5.0, rate)] } else { vec![] };
            let _ = preserver.tick(Some(frame), seqs);
        }

        // Drive enough additional ticks so seqStart + recordUpper (6.9s) is covered.
        let mut delivered = Vec::new();
        for second in 10..13u64 {
            let samples: Vec<f32> = vec![0.0; rate as usize];
            let frame = RecordFrame {
                samples,
                calc_time: CalcTime::new(second * rate as u64, rate),
                sample_rate: rate,
            };
            delivered.extend(preserver.tick(Some(frame), vec![]));
        }

        assert_eq!(delivered.len(), 1);
        let clip = &delivered[0];
        let expected_len = ((1.9 - (-0.6)) * rate as f64).round() as usize;
        assert!((clip.samples.len() as i64 - expected_len as i64).abs() <= 1);
        assert!((clip.clip_start.as_seconds() - 4.4).abs() < 1.0 / rate as f64 * 2.0);
    }

    #[test]
    fn rejects_invalid_window_at_construction() {
        let bad = RecordingWindow {
            record_lower_secs: 1.0,
            record_upper_secs: 0.0,
            record_buffer_secs: 1.0,
        };
        assert!(AudioPreserver::new(bad, 8_000).is_err());
    }
}

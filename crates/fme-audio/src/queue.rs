//! The Capture Reader's publishing policy, per SPEC_FULL.md §4.1: a
//! non-blocking handoff is retried on contention up to `max_missed_attempts`
//! times before the worker falls back to a blocking send (so a brief
//! consumer stall never drops a sample). Independently, the queue's
//! occupancy is watched against `max_queue_length`; persistently exceeding it
//! means the downstream stage cannot keep up, which is fatal for the
//! session rather than something to retry through.

use crossbeam_channel::{Receiver, Sender};
use fme_foundation::CaptureError;
use std::thread;
use std::time::Duration;

pub struct BoundedFrameQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    max_queue_length: usize,
    max_missed_attempts: u32,
}

impl<T> BoundedFrameQueue<T> {
    pub fn new(max_queue_length: usize, max_missed_attempts: u32) -> Self {
        // The channel's hard capacity is kept above the watched soft limit so
        // the retry loop can observe genuine contention before the channel
        // itself would refuse a send.
        let (tx, rx) = crossbeam_channel::bounded(max_queue_length.saturating_mul(4).max(1));
        Self {
            tx,
            rx,
            max_queue_length,
            max_missed_attempts,
        }
    }

    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }

    /// Publishes one item, applying the retry-then-block policy and the
    /// overflow watch. Returns `Err` only when the session-ending overflow
    /// condition is hit.
    pub fn publish(&self, item: T) -> Result<(), CaptureError> {
        let mut attempts = 0u32;
        let mut pending = item;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => break,
                Err(crossbeam_channel::TrySendError::Full(back)) => {
                    pending = back;
                    attempts += 1;
                    if attempts >= self.max_missed_attempts {
                        if self.tx.send(pending).is_err() {
                            return Err(CaptureError::Driver(
                                "frame queue disconnected".to_string(),
                            ));
                        }
                        break;
                    }
                    thread::sleep(Duration::from_micros(200));
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                    return Err(CaptureError::Driver("frame queue disconnected".to_string()));
                }
            }
        }

        if self.rx.len() > self.max_queue_length {
            return Err(CaptureError::QueueOverflow { attempts });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_succeeds_under_the_watched_limit() {
        let q: BoundedFrameQueue<i32> = BoundedFrameQueue::new(4, 3);
        for i in 0..4 {
            assert!(q.publish(i).is_ok());
        }
    }

    #[test]
    fn publish_reports_overflow_once_backlog_exceeds_the_limit() {
        let q: BoundedFrameQueue<i32> = BoundedFrameQueue::new(2, 2);
        let rx = q.receiver();
        // Never drained, so the backlog grows past max_queue_length.
        let _ = q.publish(1);
        let _ = q.publish(2);
        let result = q.publish(3);
        assert!(result.is_err());
        drop(rx);
    }
}
